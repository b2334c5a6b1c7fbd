//! The single-pass rewrite applied to a callee clone during inlining:
//! parameter substitution, type-variable substitution, renaming of local
//! objects, and path rewriting all happen together, because each of them
//! invalidates the reference map for the others if run separately.

use super::names::{set_name_annotation, SymRenameMap};
use crate::{
    ir::{
        BlockStatement, DeclId, Declaration, Expression, ExpressionKind, Keyset,
        MethodCallExpression, NodeIds, P4Control, P4Parser, Parameter, ParserState, SelectCase,
        SelectExpression, Statement, StatementKind, TableProperty, Transition, Type,
    },
    refs::ReferenceMap,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::debug;

/// Everything needed to splice one instance of a callee into its caller.
///
/// One record is built per inlined instance when the enclosing container is
/// prepared, then cloned per call site so site-specific bindings (the
/// directionless parameters of parser invocations) never accumulate across
/// sites. The rename map is shared by reference between the clones; it is
/// fixed after preparation and must not be mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct PerInstanceSubstitutions {
    /// Callee parameter, constructor or apply, to the expression standing in
    /// for it.
    pub param_subst: FxHashMap<DeclId, Expression>,
    /// Callee type parameter to the concrete type it was specialized with.
    pub tvs: FxHashMap<String, Type>,
    pub rename_map: Rc<SymRenameMap>,
    /// Apply parameters bound to a synthesized temporary rather than directly
    /// to the call argument. These are the ones that need copy-in/copy-out.
    pub temporaries: FxHashSet<DeclId>,
}

impl PerInstanceSubstitutions {
    /// Clones `callee` with this record applied.
    #[must_use]
    pub fn rename_control(
        &self,
        refs: &mut ReferenceMap,
        ids: &mut NodeIds,
        callee: &P4Control,
    ) -> P4Control {
        Substitutions::new(refs, ids, self).control(callee)
    }

    #[must_use]
    pub fn rename_parser(
        &self,
        refs: &mut ReferenceMap,
        ids: &mut NodeIds,
        callee: &P4Parser,
    ) -> P4Parser {
        Substitutions::new(refs, ids, self).parser(callee)
    }
}

/// Replaces occurrences of type variables by their bindings.
#[must_use]
pub fn substitute_type_vars(ty: &Type, tvs: &FxHashMap<String, Type>) -> Type {
    match ty {
        Type::Var(name) => match tvs.get(name) {
            Some(bound) => bound.clone(),
            None => ty.clone(),
        },
        Type::Stack { element, size } => Type::Stack {
            element: Box::new(substitute_type_vars(element, tvs)),
            size: *size,
        },
        Type::Header { name, fields } => Type::Header {
            name: name.clone(),
            fields: substitute_fields(fields, tvs),
        },
        Type::Struct { name, fields } => Type::Struct {
            name: name.clone(),
            fields: substitute_fields(fields, tvs),
        },
        Type::Specialized { base, arguments } => Type::Specialized {
            base: base.clone(),
            arguments: arguments
                .iter()
                .map(|argument| substitute_type_vars(argument, tvs))
                .collect(),
        },
        Type::Bool | Type::Bits { .. } | Type::Name(_) | Type::Method => ty.clone(),
    }
}

fn substitute_fields(
    fields: &[(String, Type)],
    tvs: &FxHashMap<String, Type>,
) -> Vec<(String, Type)> {
    fields
        .iter()
        .map(|(name, ty)| (name.clone(), substitute_type_vars(ty, tvs)))
        .collect()
}

struct Substitutions<'a> {
    refs: &'a mut ReferenceMap,
    ids: &'a mut NodeIds,
    subst: &'a PerInstanceSubstitutions,
}

impl<'a> Substitutions<'a> {
    fn new(
        refs: &'a mut ReferenceMap,
        ids: &'a mut NodeIds,
        subst: &'a PerInstanceSubstitutions,
    ) -> Self {
        Self { refs, ids, subst }
    }

    fn control(&mut self, control: &P4Control) -> P4Control {
        P4Control {
            id: control.id,
            name: control.name.clone(),
            annotations: control.annotations.clone(),
            type_parameters: control.type_parameters.clone(),
            constructor_parameters: self.parameters(&control.constructor_parameters),
            apply_parameters: self.parameters(&control.apply_parameters),
            locals: control
                .locals
                .iter()
                .map(|local| self.declaration(local))
                .collect(),
            body: self.statements(&control.body),
            span: control.span,
        }
    }

    fn parser(&mut self, parser: &P4Parser) -> P4Parser {
        P4Parser {
            id: parser.id,
            name: parser.name.clone(),
            annotations: parser.annotations.clone(),
            type_parameters: parser.type_parameters.clone(),
            constructor_parameters: self.parameters(&parser.constructor_parameters),
            apply_parameters: self.parameters(&parser.apply_parameters),
            locals: parser
                .locals
                .iter()
                .map(|local| self.declaration(local))
                .collect(),
            states: parser.states.iter().map(|state| self.state(state)).collect(),
            span: parser.span,
        }
    }

    fn parameters(&mut self, parameters: &[Parameter]) -> Vec<Parameter> {
        parameters
            .iter()
            .map(|parameter| Parameter {
                id: parameter.id,
                name: parameter.name.clone(),
                annotations: parameter.annotations.clone(),
                direction: parameter.direction,
                ty: substitute_type_vars(&parameter.ty, &self.subst.tvs),
                span: parameter.span,
            })
            .collect()
    }

    fn declaration(&mut self, declaration: &Declaration) -> Declaration {
        let rename = self
            .subst
            .rename_map
            .is_renamed(declaration.id())
            .then(|| {
                let internal = self.subst.rename_map.get_name(declaration.id()).to_string();
                let external = self
                    .subst
                    .rename_map
                    .get_ext_name(declaration.id())
                    .to_string();
                debug!(
                    "renaming {:?} to {internal} ({external})",
                    declaration.id(),
                );
                (internal, external)
            });

        match declaration {
            Declaration::Variable(variable) => {
                let mut variable = variable.clone();
                variable.ty = substitute_type_vars(&variable.ty, &self.subst.tvs);
                variable.initializer = variable
                    .initializer
                    .as_ref()
                    .map(|initializer| self.expression(initializer));
                // Variables are not externally visible; they get a fresh
                // internal name and no `@name` annotation.
                if let Some((internal, _)) = rename {
                    variable.name = internal;
                }
                Declaration::Variable(variable)
            }
            Declaration::Instance(instance) => {
                let mut instance = instance.clone();
                instance.ty = substitute_type_vars(&instance.ty, &self.subst.tvs);
                instance.arguments = instance
                    .arguments
                    .iter()
                    .map(|argument| self.expression(argument))
                    .collect();
                if let Some((internal, external)) = rename {
                    instance.name = internal;
                    instance.annotations = set_name_annotation(instance.annotations, &external);
                }
                Declaration::Instance(instance)
            }
            Declaration::Table(table) => {
                let mut table = table.clone();
                table.properties = table
                    .properties
                    .iter()
                    .map(|property| TableProperty {
                        name: property.name.clone(),
                        value: property
                            .value
                            .iter()
                            .map(|expression| self.expression(expression))
                            .collect(),
                    })
                    .collect();
                if let Some((internal, external)) = rename {
                    table.name = internal;
                    table.annotations = set_name_annotation(table.annotations, &external);
                }
                Declaration::Table(table)
            }
            Declaration::Action(action) => {
                let mut action = action.clone();
                action.parameters = self.parameters(&action.parameters);
                action.body = self.statements(&action.body);
                if let Some((internal, external)) = rename {
                    action.name = internal;
                    action.annotations = set_name_annotation(action.annotations, &external);
                }
                Declaration::Action(action)
            }
        }
    }

    fn statements(&mut self, statements: &[Statement]) -> Vec<Statement> {
        statements
            .iter()
            .map(|statement| self.statement(statement))
            .collect()
    }

    fn statement(&mut self, statement: &Statement) -> Statement {
        let kind = match &statement.kind {
            StatementKind::Assignment { left, right } => StatementKind::Assignment {
                left: self.expression(left),
                right: self.expression(right),
            },
            StatementKind::MethodCall(call) => StatementKind::MethodCall(self.call(call)),
            StatementKind::Block(block) => StatementKind::Block(BlockStatement {
                annotations: block.annotations.clone(),
                components: self.statements(&block.components),
            }),
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => StatementKind::If {
                condition: self.expression(condition),
                then_branch: Box::new(self.statement(then_branch)),
                else_branch: else_branch
                    .as_ref()
                    .map(|branch| Box::new(self.statement(branch))),
            },
            StatementKind::Empty => StatementKind::Empty,
        };
        Statement {
            id: statement.id,
            kind,
            span: statement.span,
        }
    }

    fn call(&mut self, call: &MethodCallExpression) -> MethodCallExpression {
        MethodCallExpression {
            id: call.id,
            method: self.expression(&call.method),
            type_arguments: call
                .type_arguments
                .iter()
                .map(|ty| substitute_type_vars(ty, &self.subst.tvs))
                .collect(),
            arguments: call
                .arguments
                .iter()
                .map(|argument| self.expression(argument))
                .collect(),
        }
    }

    fn state(&mut self, state: &ParserState) -> ParserState {
        ParserState {
            id: state.id,
            name: state.name.clone(),
            annotations: state.annotations.clone(),
            components: self.statements(&state.components),
            transition: state.transition.as_ref().map(|transition| match transition {
                Transition::Goto(target) => Transition::Goto(target.clone()),
                Transition::Select(select) => Transition::Select(SelectExpression {
                    select: select
                        .select
                        .iter()
                        .map(|expression| self.expression(expression))
                        .collect(),
                    cases: select
                        .cases
                        .iter()
                        .map(|case| SelectCase {
                            keyset: match &case.keyset {
                                Keyset::Expression(expression) => {
                                    Keyset::Expression(self.expression(expression))
                                }
                                Keyset::Default => Keyset::Default,
                            },
                            state: case.state.clone(),
                        })
                        .collect(),
                }),
            }),
            span: state.span,
        }
    }

    fn expression(&mut self, expression: &Expression) -> Expression {
        let kind = match &expression.kind {
            ExpressionKind::Path { name, absolute } => {
                let decl = self.refs.declaration(expression.id);
                if let Some(value) = self.subst.param_subst.get(&decl) {
                    debug!("substituted parameter `{name}` with `{value}`");
                    return value.clone();
                }
                let new_name = if self.subst.rename_map.is_renamed(decl) {
                    self.subst.rename_map.get_name(decl).to_string()
                } else {
                    name.clone()
                };
                // The rebuilt path must stay resolvable without a full
                // re-resolution pass.
                let id = self.ids.expression();
                self.refs.set_declaration(id, decl);
                return Expression {
                    id,
                    kind: ExpressionKind::Path {
                        name: new_name,
                        absolute: *absolute,
                    },
                    span: expression.span,
                };
            }
            ExpressionKind::Member { base, member } => ExpressionKind::Member {
                base: Box::new(self.expression(base)),
                member: member.clone(),
            },
            ExpressionKind::ArrayIndex { base, index } => ExpressionKind::ArrayIndex {
                base: Box::new(self.expression(base)),
                index: Box::new(self.expression(index)),
            },
            ExpressionKind::Slice { base, high, low } => ExpressionKind::Slice {
                base: Box::new(self.expression(base)),
                high: Box::new(self.expression(high)),
                low: Box::new(self.expression(low)),
            },
            ExpressionKind::Binary { op, left, right } => ExpressionKind::Binary {
                op: *op,
                left: Box::new(self.expression(left)),
                right: Box::new(self.expression(right)),
            },
            ExpressionKind::Unary { op, operand } => ExpressionKind::Unary {
                op: *op,
                operand: Box::new(self.expression(operand)),
            },
            ExpressionKind::Mux {
                condition,
                if_true,
                if_false,
            } => ExpressionKind::Mux {
                condition: Box::new(self.expression(condition)),
                if_true: Box::new(self.expression(if_true)),
                if_false: Box::new(self.expression(if_false)),
            },
            ExpressionKind::List { components } => ExpressionKind::List {
                components: components
                    .iter()
                    .map(|component| self.expression(component))
                    .collect(),
            },
            ExpressionKind::Constant { .. }
            | ExpressionKind::Bool(_)
            | ExpressionKind::StringLiteral(_) => expression.kind.clone(),
        };
        Expression {
            id: expression.id,
            kind,
            span: expression.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inline::names::compute_new_names,
        ir::{Direction, ProgramBuilder},
    };

    #[test]
    fn test_parameters_are_replaced_and_locals_renamed() {
        let mut builder = ProgramBuilder::new();
        let mut param = None;
        let mut var = None;
        let callee = builder.control("c", |c| {
            let p = c.apply_param("p", Direction::InOut, Type::bits(8));
            let v = c.variable("v", Type::bits(8));
            let left = c.builder().path(v);
            let right = c.builder().path(p);
            c.assign(left, right);
            param = Some(p);
            var = Some(v);
        });
        let mut caller_arg = None;
        builder.control("d", |d| {
            let x = d.variable("x", Type::bits(8));
            caller_arg = Some(x);
        });

        let built = builder.finish();
        let mut refs = built.refs;
        let mut ids = built.ids;
        let mut types = built.types;

        let argument = {
            // A path the caller would pass for `p`.
            let id = ids.expression();
            refs.set_declaration(id, caller_arg.unwrap());
            types.set_expr_type(id, Type::bits(8));
            Expression {
                id,
                kind: ExpressionKind::Path {
                    name: "x".to_string(),
                    absolute: false,
                },
                span: Default::default(),
            }
        };

        let callee = built.program.container(callee).unwrap();
        let rename_map = compute_new_names("cinst", callee, &mut refs);
        let mut substs = PerInstanceSubstitutions {
            rename_map: Rc::new(rename_map),
            ..Default::default()
        };
        substs.param_subst.insert(param.unwrap(), argument);

        let clone = substs.rename_control(&mut refs, &mut ids, callee.as_control().unwrap());

        assert_eq!(clone.locals[0].name(), "cinst_v_1");
        let StatementKind::Assignment { left, right } = &clone.body[0].kind else {
            panic!("expected an assignment");
        };
        assert_eq!(left.path_name(), Some("cinst_v_1"));
        assert_eq!(right.path_name(), Some("x"));
        // The rewritten paths resolve without re-running resolution.
        assert_eq!(refs.declaration(left.id), var.unwrap());
        assert_eq!(refs.declaration(right.id), caller_arg.unwrap());
    }

    #[test]
    fn test_type_variables_are_substituted() {
        let mut tvs = FxHashMap::default();
        tvs.insert("H".to_string(), Type::bits(16));
        let stack = Type::Stack {
            element: Box::new(Type::Var("H".to_string())),
            size: 3,
        };
        assert_eq!(
            substitute_type_vars(&stack, &tvs),
            Type::Stack {
                element: Box::new(Type::bits(16)),
                size: 3,
            },
        );
    }
}
