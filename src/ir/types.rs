use super::id::{DeclId, ExprId};
use rustc_hash::FxHashMap;

/// Resolved type of an expression or declaration. Header and struct types are
/// carried structurally; the inliner needs their field layout for reset
/// generation and for the location-set rules, nothing more.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Type {
    Bool,
    Bits { width: u32, signed: bool },
    Header { name: String, fields: Vec<(String, Type)> },
    Struct { name: String, fields: Vec<(String, Type)> },
    Stack { element: Box<Type>, size: u32 },
    /// Reference to a named container or extern type.
    Name(String),
    /// A generic type applied to concrete arguments, e.g. `C<bit<8>>`.
    Specialized { base: String, arguments: Vec<Type> },
    /// An unbound type parameter of the enclosing container.
    Var(String),
    /// The type of a method reference; carries no storage.
    Method,
}

impl Type {
    #[must_use]
    pub fn bits(width: u32) -> Self {
        Self::Bits {
            width,
            signed: false,
        }
    }

    #[must_use]
    pub fn is_stack(&self) -> bool {
        matches!(self, Self::Stack { .. })
    }

    #[must_use]
    pub fn field_type(&self, field: &str) -> Option<&Type> {
        match self {
            Self::Header { fields, .. } | Self::Struct { fields, .. } => fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, ty)| ty),
            _ => None,
        }
    }

    /// The name of the container this type refers to, if any.
    #[must_use]
    pub fn base_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) | Self::Specialized { base: name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Types for expression occurrences and declared storage, as computed by the
/// upstream type checker. Storage types are only present for objects that
/// actually own storage (variables and parameters); tables, actions, and
/// instances resolve to `None`.
#[derive(Debug, Default)]
pub struct TypeMap {
    expressions: FxHashMap<ExprId, Type>,
    declarations: FxHashMap<DeclId, Type>,
}

impl TypeMap {
    #[must_use]
    pub fn expr_type(&self, expression: ExprId) -> Option<&Type> {
        self.expressions.get(&expression)
    }

    #[must_use]
    pub fn decl_type(&self, declaration: DeclId) -> Option<&Type> {
        self.declarations.get(&declaration)
    }

    pub fn set_expr_type(&mut self, expression: ExprId, ty: Type) {
        self.expressions.insert(expression, ty);
    }

    pub fn set_decl_type(&mut self, declaration: DeclId, ty: Type) {
        self.declarations.insert(declaration, ty);
    }
}
