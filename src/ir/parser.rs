use super::{expression::Expression, id::DeclId, statement::Statement, Annotation};
use crate::position::Span;

/// Name of the state a parser starts executing in.
pub const START: &str = "start";
/// Name of the global accepting state. Every parser owns one explicitly; a
/// transition to it ends the parse successfully.
pub const ACCEPT: &str = "accept";
/// Name of the global rejecting state. Never renamed, not even across an
/// inlining boundary.
pub const REJECT: &str = "reject";

#[derive(Clone, Debug)]
pub struct ParserState {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub components: Vec<Statement>,
    pub transition: Option<Transition>,
    pub span: Span,
}

impl ParserState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.name == ACCEPT || self.name == REJECT
    }
}

/// Where control goes when a state's components are done. State references
/// are plain names here: the reference map is not reliable for state paths,
/// so state renaming works on the syntactic positions below and nowhere else.
#[derive(Clone, Debug)]
pub enum Transition {
    Goto(String),
    Select(SelectExpression),
}

#[derive(Clone, Debug)]
pub struct SelectExpression {
    pub select: Vec<Expression>,
    pub cases: Vec<SelectCase>,
}

#[derive(Clone, Debug)]
pub struct SelectCase {
    pub keyset: Keyset,
    pub state: String,
}

#[derive(Clone, Debug)]
pub enum Keyset {
    Expression(Expression),
    Default,
}
