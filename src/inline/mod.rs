//! Inlining of instantiated sub-blocks.
//!
//! The pipeline has four stages. [`discover_inlining`] walks the program and
//! registers every inlinable (caller, callee, instance) triple together with
//! its invocation sites. [`InlineWorkList`] builds the call graph and
//! schedules the work leaves first, handing out batches of non-conflicting
//! items. For each batch the [`GeneralInliner`] is prepared (per-instance
//! substitutions, new names, temporaries) and then applied as an IR-to-IR
//! transformation. [`InlineDriver::run`] ties the loop together and stops at
//! the first batch boundary with errors, so one run reports as many
//! diagnostics as it safely can.
//!
//! Everything here is strictly single-threaded structural recursion; the only
//! externally observable state that grows is the fresh-name counter inside
//! the [`ReferenceMap`], which must never retract a name.

pub use self::{
    discover::discover_inlining,
    general::GeneralInliner,
    locations::{FindLocationSets, LocationSet},
    names::{compute_new_names, set_name_annotation, SymRenameMap},
    resets::generate_resets,
    substitutions::{substitute_type_vars, PerInstanceSubstitutions},
    worklist::{InlineList, InlineSummary, InlineWork, InlineWorkItem, InlineWorkList, Invocation},
};
use crate::{
    error::ErrorSink,
    ir::{NodeIds, Program, TypeMap},
    refs::ReferenceMap,
};
use tracing::debug;

mod discover;
mod general;
mod locations;
mod names;
mod resets;
mod substitutions;
mod worklist;

#[derive(Clone, Debug)]
pub struct InlineConfig {
    /// Whether one instance may be invoked at several call sites. Targets
    /// that materialize blocks in hardware usually forbid this.
    pub allow_multiple_calls: bool,
    /// Whether a control instantiated inside another control is inlined.
    pub allow_controls: bool,
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            allow_multiple_calls: true,
            allow_controls: true,
        }
    }
}

type RecheckFn<'a> = dyn FnMut(&Program, &mut ReferenceMap, &mut TypeMap) + 'a;

/// Drives inlining to a fixed point, one batch at a time.
pub struct InlineDriver<'a> {
    config: InlineConfig,
    recheck: Option<Box<RecheckFn<'a>>>,
}

impl<'a> InlineDriver<'a> {
    #[must_use]
    pub fn new(config: InlineConfig) -> Self {
        Self {
            config,
            recheck: None,
        }
    }

    /// Installs the reference-resolution and type-checking hook invoked
    /// before each batch. Programs whose maps are kept consistent by
    /// construction can run without one.
    #[must_use]
    pub fn with_recheck(
        mut self,
        recheck: impl FnMut(&Program, &mut ReferenceMap, &mut TypeMap) + 'a,
    ) -> Self {
        self.recheck = Some(Box::new(recheck));
        self
    }

    pub fn run(
        &mut self,
        program: &mut Program,
        refs: &mut ReferenceMap,
        types: &mut TypeMap,
        ids: &mut NodeIds,
        sink: &mut ErrorSink,
    ) {
        let list = discover_inlining(program, refs, &self.config, sink);
        if sink.has_errors() {
            return;
        }
        let mut worklist = InlineWorkList::build(list, self.config.allow_multiple_calls, sink);
        while let Some(batch) = worklist.next() {
            debug!("processing a batch of {} callers", batch.caller_work.len());
            if let Some(recheck) = &mut self.recheck {
                recheck(program, refs, types);
            }
            let inliner = GeneralInliner::prepare(program, batch, refs, types, ids);
            inliner.apply(program);
            if sink.has_errors() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{DiagnosticPayload, InlineError},
        ir::{
            Annotation, BuiltProgram, DeclId, Declaration, Direction, ExpressionKind, Keyset,
            ProgramBuilder, SelectCase, StatementKind, Transition, Type,
        },
    };
    use itertools::Itertools;
    use rustc_hash::FxHashSet;

    fn run(builder: ProgramBuilder) -> (Program, ReferenceMap, ErrorSink) {
        let BuiltProgram {
            mut program,
            mut refs,
            mut types,
            mut ids,
        } = builder.finish();
        let mut sink = ErrorSink::default();
        InlineDriver::new(InlineConfig::default()).run(
            &mut program,
            &mut refs,
            &mut types,
            &mut ids,
            &mut sink,
        );
        (program, refs, sink)
    }

    fn header() -> Type {
        Type::Header {
            name: "h_t".to_string(),
            fields: vec![("f".to_string(), Type::bits(8))],
        }
    }

    fn control_of(program: &Program, id: DeclId) -> &crate::ir::P4Control {
        program.container(id).unwrap().as_control().unwrap()
    }

    #[test]
    fn test_single_call_without_aliasing_substitutes_directly() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let a = c.apply_param("a", Direction::InOut, Type::bits(8));
            let b = c.apply_param("b", Direction::InOut, Type::bits(8));
            let left = c.builder().path(a);
            let right = c.builder().path(b);
            c.assign(left, right);
        });
        let caller = builder.control("d", |c| {
            let x = c.variable("x", Type::bits(8));
            let y = c.variable("y", Type::bits(8));
            let instance = c.instance("cinst", Type::Name("c".to_string()), Vec::new());
            let first = c.builder().path(x);
            let second = c.builder().path(y);
            c.apply(instance, vec![first, second]);
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        // The instance is gone and no temporaries were added.
        assert!(caller
            .locals
            .iter()
            .all(|local| matches!(local, Declaration::Variable(_))));
        assert_eq!(caller.locals.len(), 2);

        let StatementKind::Block(block) = &caller.body[0].kind else {
            panic!("the invocation should have become a block");
        };
        // No copy statements, just the substituted callee body.
        assert_eq!(block.components.len(), 1);
        let StatementKind::Assignment { left, right } = &block.components[0].kind else {
            panic!("expected the callee's assignment");
        };
        assert_eq!(left.path_name(), Some("x"));
        assert_eq!(right.path_name(), Some("y"));
    }

    #[test]
    fn test_aliased_arguments_are_copied_through_temporaries() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let a = c.apply_param("a", Direction::InOut, header());
            let b = c.apply_param("b", Direction::InOut, header());
            let left = c.builder().path(a);
            let right = c.builder().path(b);
            c.assign(left, right);
        });
        let caller = builder.control("d", |c| {
            let stack = c.variable(
                "hs",
                Type::Stack {
                    element: Box::new(header()),
                    size: 4,
                },
            );
            let instance = c.instance("cinst", Type::Name("c".to_string()), Vec::new());
            let first = {
                let base = c.builder().path(stack);
                c.builder().member(base, "next")
            };
            let second = {
                let base = c.builder().path(stack);
                c.builder().member(base, "next")
            };
            c.apply(instance, vec![first, second]);
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        let temporaries = caller
            .locals
            .iter()
            .filter(|local| matches!(local, Declaration::Variable(_)))
            .map(Declaration::name)
            .collect_vec();
        assert_eq!(temporaries, ["hs", "a_1", "b_1"]);

        let StatementKind::Block(block) = &caller.body[0].kind else {
            panic!("the invocation should have become a block");
        };
        // Two copy-ins, the callee body, two copy-outs; no resets.
        assert_eq!(block.components.len(), 5);
        let StatementKind::Assignment { left, right } = &block.components[0].kind else {
            panic!("expected a copy-in");
        };
        assert_eq!(left.path_name(), Some("a_1"));
        assert!(
            matches!(&right.kind, ExpressionKind::Member { member, .. } if member == "next"),
        );
        let StatementKind::Assignment { left, right } = &block.components[4].kind else {
            panic!("expected a copy-out");
        };
        assert!(
            matches!(&left.kind, ExpressionKind::Member { member, .. } if member == "next"),
        );
        assert_eq!(right.path_name(), Some("b_1"));
    }

    #[test]
    fn test_out_parameters_are_reset_at_the_call_site() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let output = c.apply_param("o", Direction::Out, header());
            let field = {
                let base = c.builder().path(output);
                c.builder().member(base, "f")
            };
            let one = c.builder().constant(1);
            c.assign(field, one);
        });
        let caller = builder.control("d", |c| {
            let variable = c.variable("h", header());
            let instance = c.instance("cinst", Type::Name("c".to_string()), Vec::new());
            let argument = c.builder().path(variable);
            c.apply(instance, vec![argument]);
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        let StatementKind::Block(block) = &caller.body[0].kind else {
            panic!("the invocation should have become a block");
        };
        // Reset of the substituted argument, then the body. A directly
        // substituted out parameter needs no copy-out.
        assert_eq!(block.components.len(), 2);
        let StatementKind::MethodCall(reset) = &block.components[0].kind else {
            panic!("expected the reset call");
        };
        assert_eq!(reset.to_string(), "h.setInvalid()");
        let StatementKind::Assignment { left, .. } = &block.components[1].kind else {
            panic!("expected the callee's assignment");
        };
        assert_eq!(left.to_string(), "h.f");
    }

    #[test]
    fn test_leading_dot_external_names_survive_inlining() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let table = c.table("global_t", Vec::new());
            c.annotate(table, Annotation::external_name(".global_t"));
            c.apply(table, Vec::new());
        });
        let caller = builder.control("d", |c| {
            let instance = c.instance("cinst", Type::Name("c".to_string()), Vec::new());
            c.apply(instance, Vec::new());
        });

        let (program, refs, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        let [Declaration::Table(table)] = caller.locals.as_slice() else {
            panic!("the callee's table should have been lifted");
        };
        assert_eq!(table.name, "_global_t_1");
        assert_eq!(
            crate::ir::external_name(&table.annotations, &table.name),
            ".global_t",
        );

        // The table invocation inside the block now goes through the new
        // internal name and still resolves.
        let StatementKind::Block(block) = &caller.body[0].kind else {
            panic!("the invocation should have become a block");
        };
        let StatementKind::MethodCall(call) = &block.components[0].kind else {
            panic!("expected the table apply");
        };
        let target = call.apply_target().unwrap();
        assert_eq!(target.path_name(), Some("_global_t_1"));
        assert_eq!(refs.declaration(target.id), table.id);
    }

    #[test]
    fn test_callees_are_inlined_before_their_callers() {
        let mut builder = ProgramBuilder::new();
        builder.control("c3", |c| {
            let table = c.table("t", Vec::new());
            c.apply(table, Vec::new());
        });
        builder.control("c2", |c| {
            let instance = c.instance("c3inst", Type::Name("c3".to_string()), Vec::new());
            c.apply(instance, Vec::new());
        });
        let outermost = builder.control("c1", |c| {
            let instance = c.instance("c2inst", Type::Name("c2".to_string()), Vec::new());
            c.apply(instance, Vec::new());
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        // By the time c2 was inlined into c1 it already contained c3, so the
        // external name accumulated the whole instance path.
        let outermost = control_of(&program, outermost);
        let [Declaration::Table(table)] = outermost.locals.as_slice() else {
            panic!("expected exactly the doubly-lifted table");
        };
        assert_eq!(table.name, "c2inst_c3inst_t_1");
        assert_eq!(
            crate::ir::external_name(&table.annotations, &table.name),
            "c2inst.c3inst.t",
        );

        let StatementKind::Block(outer) = &outermost.body[0].kind else {
            panic!("expected the inlined c2 body");
        };
        let StatementKind::Block(inner) = &outer.components[0].kind else {
            panic!("expected the inlined c3 body");
        };
        let StatementKind::MethodCall(call) = &inner.components[0].kind else {
            panic!("expected the table apply");
        };
        assert_eq!(
            call.apply_target().unwrap().path_name(),
            Some("c2inst_c3inst_t_1"),
        );
    }

    #[test]
    fn test_internal_names_stay_unique_per_container() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let table = c.table("t", Vec::new());
            c.apply(table, Vec::new());
        });
        let caller = builder.control("d", |c| {
            // Two instances of the same callee in one caller.
            let first = c.instance("x", Type::Name("c".to_string()), Vec::new());
            let second = c.instance("y", Type::Name("c".to_string()), Vec::new());
            c.apply(first, Vec::new());
            c.apply(second, Vec::new());
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        let names: Vec<_> = caller.locals.iter().map(Declaration::name).collect();
        let unique: FxHashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
        let externals: FxHashSet<_> = caller
            .locals
            .iter()
            .map(Declaration::external_name)
            .collect();
        assert_eq!(externals.len(), names.len());
    }

    #[test]
    fn test_multiple_invocations_share_one_set_of_temporaries() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let p = c.apply_param("p", Direction::InOut, Type::bits(8));
            let left = c.builder().path(p);
            let right = c.builder().path(p);
            c.assign(left, right);
        });
        let caller = builder.control("d", |c| {
            let x = c.variable("x", Type::bits(8));
            let instance = c.instance("cinst", Type::Name("c".to_string()), Vec::new());
            let first = c.builder().path(x);
            c.apply(instance, vec![first]);
            let second = c.builder().path(x);
            c.apply(instance, vec![second]);
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        let temporaries = caller
            .locals
            .iter()
            .filter(|local| local.name() == "p_1")
            .count();
        assert_eq!(temporaries, 1);
        // Both invocations became blocks with copy-in, body, copy-out.
        for statement in &caller.body {
            let StatementKind::Block(block) = &statement.kind else {
                panic!("every invocation should have become a block");
            };
            assert_eq!(block.components.len(), 3);
        }
    }

    #[test]
    fn test_parser_splicing_splits_the_calling_state() {
        let mut builder = ProgramBuilder::new();
        builder.parser("A", |p| {
            p.state("start", |s| s.transition("s1"));
            p.state("s1", |s| s.transition("accept"));
        });
        let caller = builder.parser("B", |p| {
            let instance = p.instance("ainst", Type::Name("A".to_string()), Vec::new());
            p.state("start", |s| {
                s.apply(instance, Vec::new());
                s.transition("accept");
            });
        });

        let before_callee_states = 4; // start, s1, accept, reject
        let before_caller_states = 3; // start, accept, reject

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = program.container(caller).unwrap().as_parser().unwrap();
        let names = caller.states.iter().map(|state| &state.name).collect_vec();
        assert_eq!(
            names,
            [
                "start",
                "A_start_1",
                "A_s1_1",
                "post_start_1",
                "accept",
                "reject",
            ],
        );
        assert_eq!(
            caller.states.len(),
            before_caller_states + before_callee_states - 1,
        );

        let goto = |index: usize| match &caller.states[index].transition {
            Some(Transition::Goto(target)) => target.as_str(),
            other => panic!("expected a direct transition, got {other:?}"),
        };
        // The pre-fragment jumps to the callee's renamed start state, the
        // callee's accept became the continuation fragment, and the
        // continuation inherits the original transition.
        assert_eq!(goto(0), "A_start_1");
        assert_eq!(goto(1), "A_s1_1");
        assert_eq!(goto(2), "post_start_1");
        assert_eq!(goto(3), "accept");
        assert!(caller.states[3].components.is_empty());
    }

    #[test]
    fn test_parser_splicing_copies_parameters_in_and_out() {
        let mut builder = ProgramBuilder::new();
        builder.parser("A", |p| {
            let data = p.apply_param("data", Direction::InOut, Type::bits(8));
            p.state("start", |s| {
                let left = s.builder().path(data);
                let right = s.builder().path(data);
                s.assign(left, right);
                s.transition("accept");
            });
        });
        let caller = builder.parser("B", |p| {
            let variable = p.variable("v", Type::bits(8));
            let instance = p.instance("ainst", Type::Name("A".to_string()), Vec::new());
            p.state("start", |s| {
                let argument = s.builder().path(variable);
                s.apply(instance, vec![argument]);
                s.transition("accept");
            });
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = program.container(caller).unwrap().as_parser().unwrap();
        // The temporary was lifted next to the caller's own local.
        let locals = caller.locals.iter().map(Declaration::name).collect_vec();
        assert_eq!(locals, ["v", "data_1"]);

        // Copy-in at the end of the pre-fragment, copy-out at the head of the
        // continuation fragment.
        let copy_in = caller.states[0].components.last().unwrap();
        let StatementKind::Assignment { left, right } = &copy_in.kind else {
            panic!("expected the copy-in");
        };
        assert_eq!(left.path_name(), Some("data_1"));
        assert_eq!(right.path_name(), Some("v"));

        let continuation = caller
            .states
            .iter()
            .find(|state| state.name == "post_start_1")
            .unwrap();
        let StatementKind::Assignment { left, right } = &continuation.components[0].kind else {
            panic!("expected the copy-out");
        };
        assert_eq!(left.path_name(), Some("v"));
        assert_eq!(right.path_name(), Some("data_1"));
    }

    #[test]
    fn test_spliced_select_expressions_are_renamed_syntactically() {
        let mut builder = ProgramBuilder::new();
        builder.parser("A", |p| {
            let data = p.apply_param("data", Direction::In, Type::bits(8));
            p.state("start", |s| {
                let selector = s.builder().path(data);
                let zero = s.builder().constant(0);
                s.select(
                    vec![selector],
                    vec![
                        SelectCase {
                            keyset: Keyset::Expression(zero),
                            state: "s1".to_string(),
                        },
                        SelectCase {
                            keyset: Keyset::Default,
                            state: "reject".to_string(),
                        },
                    ],
                );
            });
            p.state("s1", |s| s.transition("accept"));
        });
        let caller = builder.parser("B", |p| {
            let variable = p.variable("v", Type::bits(8));
            let instance = p.instance("ainst", Type::Name("A".to_string()), Vec::new());
            p.state("start", |s| {
                let argument = s.builder().path(variable);
                s.apply(instance, vec![argument]);
                s.transition("accept");
            });
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = program.container(caller).unwrap().as_parser().unwrap();
        let spliced_start = caller
            .states
            .iter()
            .find(|state| state.name == "A_start_1")
            .unwrap();
        let Some(Transition::Select(select)) = &spliced_start.transition else {
            panic!("the spliced state should keep its select");
        };
        // The select argument went through parameter substitution and the
        // case targets were renamed purely syntactically; `reject` survives.
        assert_eq!(select.select[0].path_name(), Some("data_1"));
        assert_eq!(select.cases[0].state, "A_s1_1");
        assert_eq!(select.cases[1].state, "reject");
    }

    #[test]
    fn test_cross_kind_invocation_reports_and_leaves_the_site_alone() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |_| {});
        let caller = builder.parser("p", |p| {
            let instance = p.instance("cinst", Type::Name("c".to_string()), Vec::new());
            p.state("start", |s| {
                s.apply(instance, Vec::new());
                s.transition("accept");
            });
        });

        let (program, _, sink) = run(builder);
        assert_eq!(sink.error_count(), 1);
        assert!(matches!(
            &sink.diagnostics()[0].payload,
            DiagnosticPayload::Inline(InlineError::ControlFromParser { instance })
                if instance == "cinst"
        ));

        // The invocation site is untouched.
        let caller = program.container(caller).unwrap().as_parser().unwrap();
        assert_eq!(caller.states.len(), 3);
        assert!(matches!(
            caller.states[0].components[0].kind,
            StatementKind::MethodCall(_),
        ));
    }

    #[test]
    fn test_recheck_runs_once_per_batch() {
        let mut builder = ProgramBuilder::new();
        builder.control("c3", |c| {
            let table = c.table("t", Vec::new());
            c.apply(table, Vec::new());
        });
        builder.control("c2", |c| {
            let instance = c.instance("c3inst", Type::Name("c3".to_string()), Vec::new());
            c.apply(instance, Vec::new());
        });
        builder.control("c1", |c| {
            let instance = c.instance("c2inst", Type::Name("c2".to_string()), Vec::new());
            c.apply(instance, Vec::new());
        });

        let BuiltProgram {
            mut program,
            mut refs,
            mut types,
            mut ids,
        } = builder.finish();
        let mut sink = ErrorSink::default();
        let mut batches = 0;
        InlineDriver::new(InlineConfig::default())
            .with_recheck(|_, _, _| batches += 1)
            .run(&mut program, &mut refs, &mut types, &mut ids, &mut sink);
        assert!(!sink.has_errors());
        assert_eq!(batches, 2);
    }

    #[test]
    fn test_constructor_arguments_reach_the_inlined_body() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |c| {
            let threshold = c.constructor_param("threshold", Type::bits(8));
            let sink_param = c.apply_param("x", Direction::InOut, Type::bits(8));
            let left = c.builder().path(sink_param);
            let right = c.builder().path(threshold);
            c.assign(left, right);
        });
        let caller = builder.control("d", |c| {
            let x = c.variable("x", Type::bits(8));
            let forty_two = c.builder().constant(42);
            let instance =
                c.instance("cinst", Type::Name("c".to_string()), vec![forty_two]);
            let argument = c.builder().path(x);
            c.apply(instance, vec![argument]);
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());

        let caller = control_of(&program, caller);
        let StatementKind::Block(block) = &caller.body[0].kind else {
            panic!("the invocation should have become a block");
        };
        let StatementKind::Assignment { left, right } = &block.components[0].kind else {
            panic!("expected the callee's assignment");
        };
        assert_eq!(left.path_name(), Some("x"));
        assert_eq!(right.to_string(), "42");
    }

    #[test]
    fn test_an_instance_without_invocations_is_left_alone() {
        let mut builder = ProgramBuilder::new();
        builder.control("c", |_| {});
        let lonely = builder.control("d", |c| {
            // Instantiated but never invoked; there is no site to splice it
            // into, so it stays.
            c.instance("dead", Type::Name("c".to_string()), Vec::new());
        });

        let (program, _, sink) = run(builder);
        assert!(!sink.has_errors());
        let container = control_of(&program, lonely);
        assert_eq!(container.locals.len(), 1);
    }
}
