//! A symbolic algebra over storage locations, used to decide whether two
//! argument expressions can alias. Sets are deliberately coarse: a location
//! path is a storage root plus a chain of projections, and anything the rules
//! cannot narrow stays at the whole enclosing storage. The only consumer is
//! the `overlaps` query during inlining preparation.

use crate::{
    bug,
    ir::{DeclId, Expression, ExpressionKind, Type, TypeMap},
    refs::ReferenceMap,
};
use itertools::Itertools;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LocationSet {
    paths: Vec<LocationPath>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct LocationPath {
    root: DeclId,
    projections: Vec<Projection>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Projection {
    Field(String),
    Index(u32),
    AllIndices,
}

impl LocationSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn singleton(root: DeclId) -> Self {
        Self {
            paths: vec![LocationPath {
                root,
                projections: Vec::new(),
            }],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        Self {
            paths: self
                .paths
                .iter()
                .chain(other.paths.iter())
                .cloned()
                .collect(),
        }
    }

    /// Restriction to one named sub-storage of every location in the set.
    #[must_use]
    pub fn get_field(&self, field: &str) -> Self {
        self.project(Projection::Field(field.to_string()))
    }

    /// Restriction to one indexed cell of every location in the set.
    #[must_use]
    pub fn get_index(&self, index: u32) -> Self {
        self.project(Projection::Index(index))
    }

    /// Union over every cell of the stacks in the set.
    #[must_use]
    pub fn all_elements(&self) -> Self {
        self.project(Projection::AllIndices)
    }

    /// True iff the two sets share at least one concrete storage cell.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.paths
            .iter()
            .any(|a| other.paths.iter().any(|b| a.overlaps(b)))
    }

    /// Normal form: sorted, deduplicated, and with every path that is already
    /// covered by a shorter one removed. Canonical sets compare with `==`.
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        let sorted: Vec<_> = self.paths.iter().sorted().dedup().cloned().collect();
        let paths = sorted
            .iter()
            .filter(|path| {
                !sorted
                    .iter()
                    .any(|other| *path != other && path.covered_by(other))
            })
            .cloned()
            .collect();
        Self { paths }
    }

    fn project(&self, projection: Projection) -> Self {
        Self {
            paths: self
                .paths
                .iter()
                .map(|path| {
                    let mut path = path.clone();
                    path.projections.push(projection.clone());
                    path
                })
                .collect(),
        }
    }
}

impl LocationPath {
    fn overlaps(&self, other: &Self) -> bool {
        if self.root != other.root {
            return false;
        }
        // Once one path runs out of projections it denotes the whole
        // remaining storage, which the longer path lives inside.
        self.projections
            .iter()
            .zip(other.projections.iter())
            .all(|(a, b)| a.overlaps(b))
    }

    fn covered_by(&self, other: &Self) -> bool {
        self.root == other.root
            && other.projections.len() <= self.projections.len()
            && other
                .projections
                .iter()
                .zip(self.projections.iter())
                .all(|(general, specific)| general.covers(specific))
    }
}

impl Projection {
    fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Field(a), Self::Field(b)) => a == b,
            (Self::Index(a), Self::Index(b)) => a == b,
            (Self::AllIndices, Self::Index(_) | Self::AllIndices)
            | (Self::Index(_), Self::AllIndices) => true,
            // Mixed field/index projections at the same depth cannot denote
            // the same storage in a well-typed program.
            _ => false,
        }
    }

    fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AllIndices, Self::Index(_) | Self::AllIndices) => true,
            _ => self == other,
        }
    }
}

/// Computes the canonical location set an expression reads or writes.
pub struct FindLocationSets<'a> {
    refs: &'a ReferenceMap,
    types: &'a TypeMap,
}

impl<'a> FindLocationSets<'a> {
    #[must_use]
    pub fn new(refs: &'a ReferenceMap, types: &'a TypeMap) -> Self {
        Self { refs, types }
    }

    #[must_use]
    pub fn locations(&self, expression: &Expression) -> LocationSet {
        self.compute(expression).canonicalize()
    }

    fn compute(&self, expression: &Expression) -> LocationSet {
        match &expression.kind {
            ExpressionKind::Path { name, .. } => {
                let Some(decl) = self.refs.get_declaration(expression.id) else {
                    bug!("no declaration for path `{name}` during alias analysis");
                };
                match self.types.decl_type(decl) {
                    Some(_) => LocationSet::singleton(decl),
                    // Storageless reference, e.g. a constant or an action.
                    None => LocationSet::empty(),
                }
            }
            ExpressionKind::Member { base, member } => {
                if let Some(Type::Method) = self.types.expr_type(expression.id) {
                    return LocationSet::empty();
                }
                let storage = self.compute(base);
                let base_is_stack = self
                    .types
                    .expr_type(base.id)
                    .is_some_and(Type::is_stack);
                if base_is_stack && (member == "next" || member == "last") {
                    // `.next` and `.last` move at runtime; they may touch any
                    // cell of the stack.
                    storage
                } else {
                    storage.get_field(member)
                }
            }
            ExpressionKind::ArrayIndex { base, index } => {
                let storage = self.compute(base);
                match index.as_constant_index() {
                    Some(index) => storage.get_index(index),
                    None => storage.all_elements(),
                }
            }
            ExpressionKind::Slice { base, .. } => self.compute(base),
            ExpressionKind::Binary { left, right, .. } => {
                self.compute(left).join(&self.compute(right))
            }
            ExpressionKind::Unary { operand, .. } => self.compute(operand),
            ExpressionKind::Mux {
                condition,
                if_true,
                if_false,
            } => self
                .compute(condition)
                .join(&self.compute(if_true))
                .join(&self.compute(if_false)),
            ExpressionKind::List { components } => components
                .iter()
                .fold(LocationSet::empty(), |set, component| {
                    set.join(&self.compute(component))
                }),
            ExpressionKind::Constant { .. }
            | ExpressionKind::Bool(_)
            | ExpressionKind::StringLiteral(_) => LocationSet::empty(),
        }
    }
}
