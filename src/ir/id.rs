use std::{
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
};

/// Hands out the ids of one node kind in increasing order. Ids are never
/// reused, which is what makes them usable as stable identities across
/// rewrites.
#[derive(Clone, Debug)]
pub struct IdGenerator<T: From<usize>> {
    next_id: usize,
    _data: PhantomData<T>,
}

impl<T: From<usize>> IdGenerator<T> {
    #[must_use]
    pub fn generate(&mut self) -> T {
        let id = self.next_id;
        self.next_id += 1;
        T::from(id)
    }
}

impl<T: From<usize>> Default for IdGenerator<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            _data: PhantomData,
        }
    }
}

macro_rules! node_id {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(usize);

        impl From<usize> for $name {
            fn from(id: usize) -> Self {
                Self(id)
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

node_id!(
    /// Identity of an expression occurrence. Path expressions are keyed by
    /// this in the reference map.
    ExprId,
    "e"
);
node_id!(
    /// Identity of a statement. Invocation sites are keyed by this in the
    /// per-caller inline work.
    StmtId,
    "s"
);
node_id!(
    /// Stable identity of a named object. Rewrites create new tree nodes but
    /// carry the original `DeclId` forward, so lookups keyed on it survive
    /// renaming and cloning.
    DeclId,
    "d"
);

/// The three id generators bundled so passes can thread them as one explicit
/// parameter.
#[derive(Clone, Debug, Default)]
pub struct NodeIds {
    expressions: IdGenerator<ExprId>,
    statements: IdGenerator<StmtId>,
    declarations: IdGenerator<DeclId>,
}

impl NodeIds {
    pub fn expression(&mut self) -> ExprId {
        self.expressions.generate()
    }
    pub fn statement(&mut self) -> StmtId {
        self.statements.generate()
    }
    pub fn declaration(&mut self) -> DeclId {
        self.declarations.generate()
    }
}

#[test]
fn test_each_id_space_counts_independently() {
    let mut ids = NodeIds::default();
    assert_eq!(ids.expression(), ExprId(0));
    assert_eq!(ids.expression(), ExprId(1));
    assert_eq!(ids.statement(), StmtId(0));
    assert_eq!(ids.declaration(), DeclId(0));
    assert_eq!(ids.declaration(), DeclId(1));
}
