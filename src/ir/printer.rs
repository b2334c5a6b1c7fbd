//! A compact P4-flavoured dump of the IR, mostly for logs and test failures.

use super::{
    Annotation, AnnotationValue, Container, Declaration, Expression, ExpressionKind, Keyset,
    MethodCallExpression, P4Control, P4Parser, Parameter, ParserState, Program, Statement,
    StatementKind, Transition,
};
use itertools::Itertools;
use std::fmt::{self, Display, Formatter, Write};

impl Display for Program {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for container in &self.containers {
            writeln!(f, "{container}")?;
        }
        Ok(())
    }
}

impl Display for Container {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Control(control) => control.fmt(f),
            Self::Parser(parser) => parser.fmt(f),
        }
    }
}

impl Display for P4Control {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", annotations_prefix(&self.annotations))?;
        writeln!(
            f,
            "control {}({}) {{",
            self.name,
            parameters(&self.apply_parameters),
        )?;
        for local in &self.locals {
            writeln!(f, "  {local}")?;
        }
        writeln!(f, "  apply {{")?;
        for statement in &self.body {
            write_statement(f, statement, 2)?;
        }
        writeln!(f, "  }}")?;
        write!(f, "}}")
    }
}

impl Display for P4Parser {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", annotations_prefix(&self.annotations))?;
        writeln!(
            f,
            "parser {}({}) {{",
            self.name,
            parameters(&self.apply_parameters),
        )?;
        for local in &self.locals {
            writeln!(f, "  {local}")?;
        }
        for state in &self.states {
            write!(f, "{state}")?;
        }
        write!(f, "}}")
    }
}

impl Display for ParserState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(
            f,
            "  {}state {} {{",
            annotations_prefix(&self.annotations),
            self.name,
        )?;
        for statement in &self.components {
            write_statement(f, statement, 2)?;
        }
        match &self.transition {
            Some(Transition::Goto(target)) => writeln!(f, "    transition {target};")?,
            Some(Transition::Select(select)) => {
                writeln!(
                    f,
                    "    transition select({}) {{",
                    select.select.iter().join(", "),
                )?;
                for case in &select.cases {
                    let keyset = match &case.keyset {
                        Keyset::Expression(expression) => expression.to_string(),
                        Keyset::Default => "default".to_string(),
                    };
                    writeln!(f, "      {keyset}: {};", case.state)?;
                }
                writeln!(f, "    }}")?;
            }
            None => {}
        }
        writeln!(f, "  }}")
    }
}

impl Display for Declaration {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let prefix = annotations_prefix(self.annotations());
        match self {
            Self::Variable(variable) => match &variable.initializer {
                Some(initializer) => {
                    write!(f, "{prefix}{:?} {} = {initializer};", variable.ty, variable.name)
                }
                None => write!(f, "{prefix}{:?} {};", variable.ty, variable.name),
            },
            Self::Instance(instance) => write!(
                f,
                "{prefix}{:?}({}) {};",
                instance.ty,
                instance.arguments.iter().join(", "),
                instance.name,
            ),
            Self::Table(table) => write!(f, "{prefix}table {} {{ ... }}", table.name),
            Self::Action(action) => write!(
                f,
                "{prefix}action {}({}) {{ ... }}",
                action.name,
                parameters(&action.parameters),
            ),
        }
    }
}

fn write_statement(f: &mut Formatter, statement: &Statement, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    match &statement.kind {
        StatementKind::Assignment { left, right } => {
            writeln!(f, "{indent}{left} = {right};")
        }
        StatementKind::MethodCall(call) => writeln!(f, "{indent}{call};"),
        StatementKind::Block(block) => {
            writeln!(f, "{indent}{}{{", annotations_prefix(&block.annotations))?;
            for component in &block.components {
                write_statement(f, component, depth + 1)?;
            }
            writeln!(f, "{indent}}}")
        }
        StatementKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            writeln!(f, "{indent}if ({condition})")?;
            write_statement(f, then_branch, depth + 1)?;
            if let Some(else_branch) = else_branch {
                writeln!(f, "{indent}else")?;
                write_statement(f, else_branch, depth + 1)?;
            }
            Ok(())
        }
        StatementKind::Empty => writeln!(f, "{indent};"),
    }
}

impl Display for MethodCallExpression {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}({})", self.method, self.arguments.iter().join(", "))
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.kind {
            ExpressionKind::Path { name, absolute } => {
                if *absolute {
                    write!(f, ".{name}")
                } else {
                    write!(f, "{name}")
                }
            }
            ExpressionKind::Member { base, member } => write!(f, "{base}.{member}"),
            ExpressionKind::ArrayIndex { base, index } => write!(f, "{base}[{index}]"),
            ExpressionKind::Slice { base, high, low } => write!(f, "{base}[{high}:{low}]"),
            ExpressionKind::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            ExpressionKind::Unary { op, operand } => write!(f, "{}{operand}", op.symbol()),
            ExpressionKind::Mux {
                condition,
                if_true,
                if_false,
            } => write!(f, "({condition} ? {if_true} : {if_false})"),
            ExpressionKind::List { components } => {
                write!(f, "{{ {} }}", components.iter().join(", "))
            }
            ExpressionKind::Constant { value, .. } => write!(f, "{value}"),
            ExpressionKind::Bool(value) => write!(f, "{value}"),
            ExpressionKind::StringLiteral(value) => write!(f, "\"{value}\""),
        }
    }
}

fn parameters(parameters: &[Parameter]) -> String {
    parameters
        .iter()
        .map(|parameter| {
            let direction = parameter.direction.to_string();
            if direction.is_empty() {
                format!("{:?} {}", parameter.ty, parameter.name)
            } else {
                format!("{direction} {:?} {}", parameter.ty, parameter.name)
            }
        })
        .join(", ")
}

fn annotations_prefix(annotations: &[Annotation]) -> String {
    let mut result = String::new();
    for annotation in annotations {
        match &annotation.value {
            AnnotationValue::Empty => write!(result, "@{} ", annotation.name).unwrap(),
            AnnotationValue::String(value) => {
                write!(result, "@{}(\"{value}\") ", annotation.name).unwrap()
            }
        }
    }
    result
}
