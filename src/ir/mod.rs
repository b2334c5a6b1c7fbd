//! The typed intermediate representation the midend operates on.
//!
//! Trees are plain owned values. Cloning a subtree keeps every node's id, so
//! a declaration's [`DeclId`] works as its stable identity across rewrites:
//! a renamed clone still answers lookups keyed on the original handle. Fresh
//! ids are minted only for genuinely new objects.

pub use self::{
    builder::*, expression::*, id::*, parser::*, printer::*, statement::*, types::*,
};
use crate::position::Span;

mod builder;
mod expression;
mod id;
mod parser;
mod printer;
mod statement;
mod types;

/// Name of the annotation that carries an object's externally visible name.
pub const NAME_ANNOTATION: &str = "name";

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub containers: Vec<Container>,
}

impl Program {
    #[must_use]
    pub fn container(&self, id: DeclId) -> Option<&Container> {
        self.containers.iter().find(|c| c.id() == id)
    }

    #[must_use]
    pub fn container_by_name(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name() == name)
    }
}

#[derive(Clone, Debug)]
pub enum Container {
    Control(P4Control),
    Parser(P4Parser),
}

impl Container {
    #[must_use]
    pub fn id(&self) -> DeclId {
        match self {
            Self::Control(control) => control.id,
            Self::Parser(parser) => parser.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Control(control) => &control.name,
            Self::Parser(parser) => &parser.name,
        }
    }

    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        match self {
            Self::Control(control) => &control.annotations,
            Self::Parser(parser) => &parser.annotations,
        }
    }

    #[must_use]
    pub fn locals(&self) -> &[Declaration] {
        match self {
            Self::Control(control) => &control.locals,
            Self::Parser(parser) => &parser.locals,
        }
    }

    #[must_use]
    pub fn apply_parameters(&self) -> &[Parameter] {
        match self {
            Self::Control(control) => &control.apply_parameters,
            Self::Parser(parser) => &parser.apply_parameters,
        }
    }

    #[must_use]
    pub fn constructor_parameters(&self) -> &[Parameter] {
        match self {
            Self::Control(control) => &control.constructor_parameters,
            Self::Parser(parser) => &parser.constructor_parameters,
        }
    }

    #[must_use]
    pub fn type_parameters(&self) -> &[String] {
        match self {
            Self::Control(control) => &control.type_parameters,
            Self::Parser(parser) => &parser.type_parameters,
        }
    }

    #[must_use]
    pub fn as_control(&self) -> Option<&P4Control> {
        match self {
            Self::Control(control) => Some(control),
            Self::Parser(_) => None,
        }
    }

    #[must_use]
    pub fn as_parser(&self) -> Option<&P4Parser> {
        match self {
            Self::Parser(parser) => Some(parser),
            Self::Control(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct P4Control {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub type_parameters: Vec<String>,
    pub constructor_parameters: Vec<Parameter>,
    pub apply_parameters: Vec<Parameter>,
    pub locals: Vec<Declaration>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct P4Parser {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub type_parameters: Vec<String>,
    pub constructor_parameters: Vec<Parameter>,
    pub apply_parameters: Vec<Parameter>,
    pub locals: Vec<Declaration>,
    pub states: Vec<ParserState>,
    pub span: Span,
}

/// A runtime parameter of a container's apply method, or a constructor
/// parameter (those are always directionless).
#[derive(Clone, Debug)]
pub struct Parameter {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub direction: Direction,
    pub ty: Type,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
pub enum Direction {
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "out")]
    Out,
    #[strum(serialize = "inout")]
    InOut,
}

/// A local declaration of a container. These are exactly the objects the
/// inliner renames when it lifts them into the caller.
#[derive(Clone, Debug)]
pub enum Declaration {
    Variable(DeclVariable),
    Instance(DeclInstance),
    Table(DeclTable),
    Action(DeclAction),
}

impl Declaration {
    #[must_use]
    pub fn id(&self) -> DeclId {
        match self {
            Self::Variable(variable) => variable.id,
            Self::Instance(instance) => instance.id,
            Self::Table(table) => table.id,
            Self::Action(action) => action.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Variable(variable) => &variable.name,
            Self::Instance(instance) => &instance.name,
            Self::Table(table) => &table.name,
            Self::Action(action) => &action.name,
        }
    }

    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        match self {
            Self::Variable(variable) => &variable.annotations,
            Self::Instance(instance) => &instance.annotations,
            Self::Table(table) => &table.annotations,
            Self::Action(action) => &action.annotations,
        }
    }

    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Variable(variable) => variable.span,
            Self::Instance(instance) => instance.span,
            Self::Table(table) => table.span,
            Self::Action(action) => action.span,
        }
    }

    /// The dotted path by which external tooling identifies this object: the
    /// value of its `@name` annotation when present, the declared name
    /// otherwise.
    #[must_use]
    pub fn external_name(&self) -> String {
        external_name(self.annotations(), self.name())
    }
}

#[must_use]
pub fn external_name(annotations: &[Annotation], declared: &str) -> String {
    annotations
        .iter()
        .rev()
        .find_map(|annotation| match (&*annotation.name, &annotation.value) {
            (NAME_ANNOTATION, AnnotationValue::String(name)) => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| declared.to_string())
}

#[derive(Clone, Debug)]
pub struct DeclVariable {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub ty: Type,
    pub initializer: Option<Expression>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct DeclInstance {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub ty: Type,
    pub arguments: Vec<Expression>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct DeclTable {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub properties: Vec<TableProperty>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct TableProperty {
    pub name: String,
    pub value: Vec<Expression>,
}

#[derive(Clone, Debug)]
pub struct DeclAction {
    pub id: DeclId,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub value: AnnotationValue,
}

impl Annotation {
    /// Builds a `@name(...)` annotation.
    #[must_use]
    pub fn external_name(name: &str) -> Self {
        Self {
            name: NAME_ANNOTATION.to_string(),
            value: AnnotationValue::String(name.to_string()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AnnotationValue {
    Empty,
    String(String),
}
