//! Convenience layer for constructing well-formed programs.
//!
//! The builder does the bookkeeping the upstream frontend would normally do:
//! every declared name is registered with the [`ReferenceMap`] so fresh names
//! never collide with it, every path expression is resolved at construction
//! time, and storage types land in the [`TypeMap`]. Tests build programs
//! exclusively through this.

use super::{
    Annotation, Container, DeclAction, DeclId, DeclInstance, DeclTable, DeclVariable, Declaration,
    Direction, Expression, ExpressionKind, MethodCallExpression, NodeIds, P4Control, P4Parser,
    Parameter, ParserState, Program, SelectCase, SelectExpression, Statement, StatementKind,
    StmtId, TableProperty, Transition, Type, TypeMap, ACCEPT, REJECT,
};
use crate::{bug, position::Span, refs::ReferenceMap};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;

pub struct ProgramBuilder {
    pub ids: NodeIds,
    pub refs: ReferenceMap,
    pub types: TypeMap,
    containers: Vec<Container>,
    decl_names: FxHashMap<DeclId, String>,
}

/// Everything a finished build produces; the maps stay consistent with the
/// program, the way the surrounding pipeline guarantees before each pass.
pub struct BuiltProgram {
    pub program: Program,
    pub refs: ReferenceMap,
    pub types: TypeMap,
    pub ids: NodeIds,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: NodeIds::default(),
            refs: ReferenceMap::default(),
            types: TypeMap::default(),
            containers: Vec::new(),
            decl_names: FxHashMap::default(),
        }
    }

    pub fn control(&mut self, name: &str, build: impl FnOnce(&mut ControlBuilder)) -> DeclId {
        let id = self.fresh_decl(name);
        let control = P4Control {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            type_parameters: Vec::new(),
            constructor_parameters: Vec::new(),
            apply_parameters: Vec::new(),
            locals: Vec::new(),
            body: Vec::new(),
            span: Span::default(),
        };
        let mut builder = ControlBuilder {
            builder: self,
            control,
        };
        build(&mut builder);
        let control = builder.control;
        self.containers.push(Container::Control(control));
        id
    }

    pub fn parser(&mut self, name: &str, build: impl FnOnce(&mut ParserBuilder)) -> DeclId {
        let id = self.fresh_decl(name);
        let parser = P4Parser {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            type_parameters: Vec::new(),
            constructor_parameters: Vec::new(),
            apply_parameters: Vec::new(),
            locals: Vec::new(),
            states: Vec::new(),
            span: Span::default(),
        };
        let mut builder = ParserBuilder {
            builder: self,
            parser,
        };
        build(&mut builder);
        let mut parser = builder.parser;
        // Every parser owns its terminal states explicitly.
        for terminal in [ACCEPT, REJECT] {
            if !parser.states.iter().any(|state| state.name == terminal) {
                let id = self.fresh_decl(terminal);
                parser.states.push(ParserState {
                    id,
                    name: terminal.to_string(),
                    annotations: Vec::new(),
                    components: Vec::new(),
                    transition: None,
                    span: Span::default(),
                });
            }
        }
        self.containers.push(Container::Parser(parser));
        id
    }

    #[must_use]
    pub fn finish(self) -> BuiltProgram {
        BuiltProgram {
            program: Program {
                containers: self.containers,
            },
            refs: self.refs,
            types: self.types,
            ids: self.ids,
        }
    }

    /// A resolved reference to `decl`, registered in the reference map and
    /// typed with the declaration's storage type when it has one.
    pub fn path(&mut self, decl: DeclId) -> Expression {
        let name = match self.decl_names.get(&decl) {
            Some(name) => name.clone(),
            None => bug!("path to unknown declaration {decl:?}"),
        };
        let id = self.ids.expression();
        self.refs.set_declaration(id, decl);
        if let Some(ty) = self.types.decl_type(decl) {
            let ty = ty.clone();
            self.types.set_expr_type(id, ty);
        }
        Expression {
            id,
            kind: ExpressionKind::Path {
                name,
                absolute: false,
            },
            span: Span::default(),
        }
    }

    pub fn member(&mut self, base: Expression, member: &str) -> Expression {
        let id = self.ids.expression();
        let derived = self.types.expr_type(base.id).and_then(|ty| match ty {
            Type::Stack { element, .. } if member == "next" || member == "last" => {
                Some((**element).clone())
            }
            _ => ty.field_type(member).cloned(),
        });
        if let Some(ty) = derived {
            self.types.set_expr_type(id, ty);
        }
        Expression {
            id,
            kind: ExpressionKind::Member {
                base: Box::new(base),
                member: member.to_string(),
            },
            span: Span::default(),
        }
    }

    pub fn index(&mut self, base: Expression, index: u32) -> Expression {
        let index = self.constant(i64::from(index));
        self.index_by(base, index)
    }

    pub fn index_by(&mut self, base: Expression, index: Expression) -> Expression {
        let id = self.ids.expression();
        let derived = self.types.expr_type(base.id).and_then(|ty| match ty {
            Type::Stack { element, .. } => Some((**element).clone()),
            _ => None,
        });
        if let Some(ty) = derived {
            self.types.set_expr_type(id, ty);
        }
        Expression {
            id,
            kind: ExpressionKind::ArrayIndex {
                base: Box::new(base),
                index: Box::new(index),
            },
            span: Span::default(),
        }
    }

    pub fn constant(&mut self, value: i64) -> Expression {
        Expression {
            id: self.ids.expression(),
            kind: ExpressionKind::Constant {
                value: BigInt::from(value),
                width: None,
            },
            span: Span::default(),
        }
    }

    fn fresh_decl(&mut self, name: &str) -> DeclId {
        let id = self.ids.declaration();
        self.refs.mark_name_used(name);
        self.decl_names.insert(id, name.to_string());
        id
    }

    fn apply_statement(&mut self, target: DeclId, arguments: Vec<Expression>) -> Statement {
        let base = self.path(target);
        let method_id = self.ids.expression();
        self.types.set_expr_type(method_id, Type::Method);
        let method = Expression {
            id: method_id,
            kind: ExpressionKind::Member {
                base: Box::new(base),
                member: "apply".to_string(),
            },
            span: Span::default(),
        };
        Statement {
            id: self.ids.statement(),
            kind: StatementKind::MethodCall(MethodCallExpression {
                id: self.ids.expression(),
                method,
                type_arguments: Vec::new(),
                arguments,
            }),
            span: Span::default(),
        }
    }

    fn assignment_statement(&mut self, left: Expression, right: Expression) -> Statement {
        Statement {
            id: self.ids.statement(),
            kind: StatementKind::Assignment { left, right },
            span: Span::default(),
        }
    }
}

pub struct ControlBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    control: P4Control,
}

impl ControlBuilder<'_> {
    pub fn apply_param(&mut self, name: &str, direction: Direction, ty: Type) -> DeclId {
        let parameter = self.parameter(name, direction, ty);
        let id = parameter.id;
        self.control.apply_parameters.push(parameter);
        id
    }

    pub fn constructor_param(&mut self, name: &str, ty: Type) -> DeclId {
        let parameter = self.parameter(name, Direction::None, ty);
        let id = parameter.id;
        self.control.constructor_parameters.push(parameter);
        id
    }

    pub fn type_parameter(&mut self, name: &str) {
        self.control.type_parameters.push(name.to_string());
    }

    pub fn variable(&mut self, name: &str, ty: Type) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.builder.types.set_decl_type(id, ty.clone());
        self.control.locals.push(Declaration::Variable(DeclVariable {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            ty,
            initializer: None,
            span: Span::default(),
        }));
        id
    }

    pub fn instance(&mut self, name: &str, ty: Type, arguments: Vec<Expression>) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.control.locals.push(Declaration::Instance(DeclInstance {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            ty,
            arguments,
            span: Span::default(),
        }));
        id
    }

    pub fn table(&mut self, name: &str, properties: Vec<TableProperty>) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.control.locals.push(Declaration::Table(DeclTable {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            properties,
            span: Span::default(),
        }));
        id
    }

    pub fn action(&mut self, name: &str) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.control.locals.push(Declaration::Action(DeclAction {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            parameters: Vec::new(),
            body: Vec::new(),
            span: Span::default(),
        }));
        id
    }

    /// Attaches an annotation to an already-declared local.
    pub fn annotate(&mut self, decl: DeclId, annotation: Annotation) {
        let local = self
            .control
            .locals
            .iter_mut()
            .find(|local| local.id() == decl);
        let Some(local) = local else {
            bug!("annotating unknown local {decl:?}");
        };
        let annotations = match local {
            Declaration::Variable(variable) => &mut variable.annotations,
            Declaration::Instance(instance) => &mut instance.annotations,
            Declaration::Table(table) => &mut table.annotations,
            Declaration::Action(action) => &mut action.annotations,
        };
        annotations.push(annotation);
    }

    pub fn assign(&mut self, left: Expression, right: Expression) -> StmtId {
        let statement = self.builder.assignment_statement(left, right);
        let id = statement.id;
        self.control.body.push(statement);
        id
    }

    pub fn apply(&mut self, target: DeclId, arguments: Vec<Expression>) -> StmtId {
        let statement = self.builder.apply_statement(target, arguments);
        let id = statement.id;
        self.control.body.push(statement);
        id
    }

    pub fn push_statement(&mut self, statement: Statement) {
        self.control.body.push(statement);
    }

    pub fn builder(&mut self) -> &mut ProgramBuilder {
        self.builder
    }

    fn parameter(&mut self, name: &str, direction: Direction, ty: Type) -> Parameter {
        let id = self.builder.fresh_decl(name);
        self.builder.types.set_decl_type(id, ty.clone());
        Parameter {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            direction,
            ty,
            span: Span::default(),
        }
    }
}

pub struct ParserBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    parser: P4Parser,
}

impl ParserBuilder<'_> {
    pub fn apply_param(&mut self, name: &str, direction: Direction, ty: Type) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.builder.types.set_decl_type(id, ty.clone());
        self.parser.apply_parameters.push(Parameter {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            direction,
            ty,
            span: Span::default(),
        });
        id
    }

    pub fn variable(&mut self, name: &str, ty: Type) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.builder.types.set_decl_type(id, ty.clone());
        self.parser.locals.push(Declaration::Variable(DeclVariable {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            ty,
            initializer: None,
            span: Span::default(),
        }));
        id
    }

    pub fn instance(&mut self, name: &str, ty: Type, arguments: Vec<Expression>) -> DeclId {
        let id = self.builder.fresh_decl(name);
        self.parser.locals.push(Declaration::Instance(DeclInstance {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            ty,
            arguments,
            span: Span::default(),
        }));
        id
    }

    pub fn state(&mut self, name: &str, build: impl FnOnce(&mut StateBuilder)) -> DeclId {
        let id = self.builder.fresh_decl(name);
        let state = ParserState {
            id,
            name: name.to_string(),
            annotations: Vec::new(),
            components: Vec::new(),
            transition: None,
            span: Span::default(),
        };
        let mut builder = StateBuilder {
            builder: &mut *self.builder,
            state,
        };
        build(&mut builder);
        self.parser.states.push(builder.state);
        id
    }

    pub fn builder(&mut self) -> &mut ProgramBuilder {
        self.builder
    }
}

pub struct StateBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    state: ParserState,
}

impl StateBuilder<'_> {
    pub fn assign(&mut self, left: Expression, right: Expression) -> StmtId {
        let statement = self.builder.assignment_statement(left, right);
        let id = statement.id;
        self.state.components.push(statement);
        id
    }

    pub fn apply(&mut self, target: DeclId, arguments: Vec<Expression>) -> StmtId {
        let statement = self.builder.apply_statement(target, arguments);
        let id = statement.id;
        self.state.components.push(statement);
        id
    }

    pub fn transition(&mut self, target: &str) {
        self.state.transition = Some(Transition::Goto(target.to_string()));
    }

    pub fn select(&mut self, select: Vec<Expression>, cases: Vec<SelectCase>) {
        self.state.transition = Some(Transition::Select(SelectExpression { select, cases }));
    }

    pub fn builder(&mut self) -> &mut ProgramBuilder {
        self.builder
    }
}
