use super::{id::ExprId, types::Type};
use crate::position::Span;
use num_bigint::BigInt;

#[derive(Clone, Debug)]
pub struct Expression {
    pub id: ExprId,
    pub kind: ExpressionKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum ExpressionKind {
    /// A reference to a named object. `absolute` marks paths written with a
    /// leading dot, which resolve in the global scope.
    Path { name: String, absolute: bool },
    Member {
        base: Box<Expression>,
        member: String,
    },
    ArrayIndex {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    Slice {
        base: Box<Expression>,
        high: Box<Expression>,
        low: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Mux {
        condition: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
    List { components: Vec<Expression> },
    Constant { value: BigInt, width: Option<u32> },
    Bool(bool),
    StringLiteral(String),
}

impl Expression {
    #[must_use]
    pub fn path_name(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Path { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The value of this expression as a stack index, when it is a
    /// compile-time constant that fits one.
    #[must_use]
    pub fn as_constant_index(&self) -> Option<u32> {
        match &self.kind {
            ExpressionKind::Constant { value, .. } => u32::try_from(value).ok(),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Concat => "++",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Not,
    BitNot,
    Neg,
}

impl UnaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::BitNot => "~",
            Self::Neg => "-",
        }
    }
}

/// A call of the form `method<type_arguments>(arguments)`. Calls only occur
/// in statement position in this IR; the apply invocations the inliner
/// rewrites are all of the shape `instance.apply(...)`.
#[derive(Clone, Debug)]
pub struct MethodCallExpression {
    pub id: ExprId,
    pub method: Expression,
    pub type_arguments: Vec<Type>,
    pub arguments: Vec<Expression>,
}

impl MethodCallExpression {
    /// The path of the object an `apply` invocation targets.
    #[must_use]
    pub fn apply_target(&self) -> Option<&Expression> {
        match &self.method.kind {
            ExpressionKind::Member { base, member } if member == "apply" => {
                base.path_name().map(|_| base.as_ref())
            }
            _ => None,
        }
    }
}
