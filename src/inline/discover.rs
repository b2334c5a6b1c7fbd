//! Walks the instantiated containers and registers what can be inlined:
//! every (caller, callee, instance) triple, and every `apply` invocation of
//! such an instance. Cross-kind instantiation is a user error; a control
//! inside a control is only registered when the target allows it.

use super::worklist::{InlineList, Invocation};
use crate::{
    error::{ErrorSink, InlineError},
    inline::InlineConfig,
    ir::{Container, DeclId, Declaration, Program, Statement, StatementKind},
    refs::ReferenceMap,
};
use rustc_hash::FxHashSet;
use tracing::debug;

pub fn discover_inlining(
    program: &Program,
    refs: &ReferenceMap,
    config: &InlineConfig,
    sink: &mut ErrorSink,
) -> InlineList {
    let mut list = InlineList::default();
    for caller in &program.containers {
        let mut discovery = Discovery {
            program,
            refs,
            list: &mut list,
            inlinable: FxHashSet::default(),
        };
        discovery.instantiations(caller, config, sink);
        discovery.invocations(caller);
    }
    list
}

struct Discovery<'a> {
    program: &'a Program,
    refs: &'a ReferenceMap,
    list: &'a mut InlineList,
    /// Instances of this caller that were registered for inlining.
    inlinable: FxHashSet<DeclId>,
}

impl Discovery<'_> {
    fn instantiations(&mut self, caller: &Container, config: &InlineConfig, sink: &mut ErrorSink) {
        for local in caller.locals() {
            let Declaration::Instance(instance) = local else {
                continue;
            };
            let Some(callee) = instance
                .ty
                .base_name()
                .and_then(|name| self.program.container_by_name(name))
            else {
                // An extern or package instantiation; not ours to inline.
                continue;
            };
            debug!(
                "visiting instantiation `{}` of `{}` in `{}`",
                instance.name,
                callee.name(),
                caller.name(),
            );
            match (caller, callee) {
                (Container::Parser(_), Container::Control(_)) => {
                    sink.error(
                        instance.span,
                        InlineError::ControlFromParser {
                            instance: instance.name.clone(),
                        },
                    );
                }
                (Container::Control(_), Container::Parser(_)) => {
                    sink.error(
                        instance.span,
                        InlineError::ParserFromControl {
                            instance: instance.name.clone(),
                        },
                    );
                }
                (Container::Control(_), Container::Control(_)) if !config.allow_controls => {}
                _ => {
                    self.list.add_instantiation(
                        caller.id(),
                        callee.id(),
                        instance.id,
                        &instance.name,
                    );
                    self.inlinable.insert(instance.id);
                }
            }
        }
    }

    fn invocations(&mut self, caller: &Container) {
        match caller {
            Container::Control(control) => self.statements(&control.body),
            Container::Parser(parser) => {
                // Splicing only rewrites a state's direct components, so only
                // those are registered as invocation sites.
                for state in &parser.states {
                    for statement in &state.components {
                        self.invocation(statement);
                    }
                }
            }
        }
    }

    fn statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            match &statement.kind {
                StatementKind::MethodCall(_) => self.invocation(statement),
                StatementKind::Block(block) => self.statements(&block.components),
                StatementKind::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    self.statements(std::slice::from_ref(then_branch));
                    if let Some(else_branch) = else_branch {
                        self.statements(std::slice::from_ref(else_branch));
                    }
                }
                StatementKind::Assignment { .. } | StatementKind::Empty => {}
            }
        }
    }

    fn invocation(&mut self, statement: &Statement) {
        let StatementKind::MethodCall(call) = &statement.kind else {
            return;
        };
        let Some(target) = call.apply_target() else {
            return;
        };
        let Some(decl) = self.refs.get_declaration(target.id) else {
            return;
        };
        if self.inlinable.contains(&decl) {
            debug!("visiting invocation at {:?}", statement.id);
            self.list.add_invocation(
                decl,
                Invocation {
                    statement: statement.id,
                    span: statement.span,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{DiagnosticPayload, ErrorSink},
        ir::{ProgramBuilder, Type},
    };

    #[test]
    fn test_parser_in_parser_is_registered() {
        let mut builder = ProgramBuilder::new();
        builder.parser("a", |p| {
            p.state("start", |s| s.transition("accept"));
        });
        builder.parser("b", |p| {
            let inst = p.instance("ainst", Type::Name("a".to_string()), Vec::new());
            p.state("start", |s| {
                s.apply(inst, Vec::new());
                s.transition("accept");
            });
        });
        let built = builder.finish();
        let mut sink = ErrorSink::default();
        let list = discover_inlining(
            &built.program,
            &built.refs,
            &InlineConfig::default(),
            &mut sink,
        );
        assert!(!list.is_empty());
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_control_inside_parser_is_a_source_error() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |_| {});
        builder.parser("p", |p| {
            let inst = p.instance("cinst", Type::Name("c".to_string()), Vec::new());
            p.state("start", |s| {
                s.apply(inst, Vec::new());
                s.transition("accept");
            });
        });
        let built = builder.finish();
        let mut sink = ErrorSink::default();
        let list = discover_inlining(
            &built.program,
            &built.refs,
            &InlineConfig::default(),
            &mut sink,
        );
        assert!(list.is_empty());
        assert_eq!(sink.error_count(), 1);
        assert!(matches!(
            &sink.diagnostics()[0].payload,
            DiagnosticPayload::Inline(InlineError::ControlFromParser { instance })
                if instance == "cinst"
        ));
    }

    #[test]
    fn test_extern_instances_are_ignored() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let inst = c.instance(
                "counter",
                Type::Name("DirectCounter".to_string()),
                Vec::new(),
            );
            c.apply(inst, Vec::new());
        });
        let built = builder.finish();
        let mut sink = ErrorSink::default();
        let list = discover_inlining(
            &built.program,
            &built.refs,
            &InlineConfig::default(),
            &mut sink,
        );
        assert!(list.is_empty());
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_control_in_control_respects_the_flag() {
        let build = || {
            let mut builder = ProgramBuilder::new();
            builder.control("inner", |_| {});
            builder.control("outer", |c| {
                let inst = c.instance("i", Type::Name("inner".to_string()), Vec::new());
                c.apply(inst, Vec::new());
            });
            builder.finish()
        };

        let built = build();
        let mut sink = ErrorSink::default();
        let allowed = discover_inlining(
            &built.program,
            &built.refs,
            &InlineConfig::default(),
            &mut sink,
        );
        assert!(!allowed.is_empty());

        let built = build();
        let config = InlineConfig {
            allow_controls: false,
            ..Default::default()
        };
        let forbidden = discover_inlining(&built.program, &built.refs, &config, &mut sink);
        assert!(forbidden.is_empty());
        assert!(!sink.has_errors());
    }
}
