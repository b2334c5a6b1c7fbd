//! Reset statements for `out` parameters. A callee must observe an `out`
//! argument as a fresh, invalid value, so before its body runs every header
//! reachable through the bound storage is invalidated.

use crate::{
    ir::{
        Expression, ExpressionKind, MethodCallExpression, NodeIds, Statement, StatementKind, Type,
    },
    position::Span,
};

/// Appends the statements that reset `target` (of type `ty`) to `out`.
/// Headers get a `setInvalid()` call, structs recurse into their fields, and
/// stacks recurse into every cell. Scalar storage needs no reset.
pub fn generate_resets(ty: &Type, target: &Expression, ids: &mut NodeIds, out: &mut Vec<Statement>) {
    match ty {
        Type::Header { .. } => {
            let method = Expression {
                id: ids.expression(),
                kind: ExpressionKind::Member {
                    base: Box::new(target.clone()),
                    member: "setInvalid".to_string(),
                },
                span: target.span,
            };
            out.push(Statement {
                id: ids.statement(),
                kind: StatementKind::MethodCall(MethodCallExpression {
                    id: ids.expression(),
                    method,
                    type_arguments: Vec::new(),
                    arguments: Vec::new(),
                }),
                span: target.span,
            });
        }
        Type::Struct { fields, .. } => {
            for (name, field_ty) in fields {
                let member = Expression {
                    id: ids.expression(),
                    kind: ExpressionKind::Member {
                        base: Box::new(target.clone()),
                        member: name.clone(),
                    },
                    span: target.span,
                };
                generate_resets(field_ty, &member, ids, out);
            }
        }
        Type::Stack { element, size } => {
            for index in 0..*size {
                let index_expression = Expression {
                    id: ids.expression(),
                    kind: ExpressionKind::Constant {
                        value: index.into(),
                        width: None,
                    },
                    span: Span::default(),
                };
                let cell = Expression {
                    id: ids.expression(),
                    kind: ExpressionKind::ArrayIndex {
                        base: Box::new(target.clone()),
                        index: Box::new(index_expression),
                    },
                    span: target.span,
                };
                generate_resets(element, &cell, ids, out);
            }
        }
        Type::Bool
        | Type::Bits { .. }
        | Type::Name(_)
        | Type::Specialized { .. }
        | Type::Var(_)
        | Type::Method => {}
    }
}
