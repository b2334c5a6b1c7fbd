//! The inliner proper. Controls get their callee's locals lifted into the
//! caller and each invocation rewritten into a block with copy-in/copy-out
//! statements. Parsers are state machines, so an invocation inside a state
//! splits that state: everything before the call becomes one fragment, the
//! callee's states are spliced in renamed, and everything after the call
//! starts a continuation fragment wired to the callee's former `accept`.

use super::{
    locations::FindLocationSets,
    names::compute_new_names,
    resets::generate_resets,
    substitutions::{substitute_type_vars, PerInstanceSubstitutions},
    worklist::{InlineSummary, InlineWork},
};
use crate::{
    bug,
    ir::{
        external_name, BlockStatement, Container, DeclId, DeclInstance, DeclVariable, Declaration,
        Direction, Expression, ExpressionKind, MethodCallExpression, NodeIds, P4Control, P4Parser,
        Parameter, ParserState, Program, Statement, StatementKind, StmtId, Transition, Type,
        TypeMap, ACCEPT, NAME_ANNOTATION, REJECT, START,
    },
    position::Span,
    refs::ReferenceMap,
};
use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{mem, rc::Rc};
use tracing::debug;

/// Applies one batch of inlinings as an IR-to-IR transformation.
pub struct GeneralInliner<'a> {
    refs: &'a mut ReferenceMap,
    types: &'a mut TypeMap,
    ids: &'a mut NodeIds,
    summary: InlineSummary,
    callees: FxHashMap<DeclId, Container>,
}

impl<'a> GeneralInliner<'a> {
    /// Snapshots every callee of the batch. Scheduling guarantees none of
    /// them is also a caller in this batch, so the snapshots stay current
    /// while the callers are rewritten.
    pub fn prepare(
        program: &Program,
        summary: InlineSummary,
        refs: &'a mut ReferenceMap,
        types: &'a mut TypeMap,
        ids: &'a mut NodeIds,
    ) -> Self {
        let mut callees = FxHashMap::default();
        for work in summary.caller_work.values() {
            for &callee in work.decl_to_callee.values() {
                if callees.contains_key(&callee) {
                    continue;
                }
                match program.container(callee) {
                    Some(container) => {
                        callees.insert(callee, container.clone());
                    }
                    None => bug!("callee {callee:?} is not a container of the program"),
                }
            }
        }
        Self {
            refs,
            types,
            ids,
            summary,
            callees,
        }
    }

    pub fn apply(self, program: &mut Program) {
        let Self {
            refs,
            types,
            ids,
            mut summary,
            callees,
        } = self;
        let mut context = InlineContext {
            refs,
            types,
            ids,
            callees: &callees,
        };
        for container in &mut program.containers {
            let Some(mut work) = summary.caller_work.remove(&container.id()) else {
                continue;
            };
            match container {
                Container::Control(control) => context.inline_into_control(control, &mut work),
                Container::Parser(parser) => context.inline_into_parser(parser, &mut work),
            }
        }
    }
}

struct InlineContext<'a> {
    refs: &'a mut ReferenceMap,
    types: &'a mut TypeMap,
    ids: &'a mut NodeIds,
    callees: &'a FxHashMap<DeclId, Container>,
}

impl<'a> InlineContext<'a> {
    fn callee(&self, id: DeclId) -> &'a Container {
        let callees = self.callees;
        match callees.get(&id) {
            Some(container) => container,
            None => bug!("callee {id:?} was not prepared for this batch"),
        }
    }

    fn inline_into_control(&mut self, caller: &mut P4Control, work: &mut InlineWork) {
        debug!("analyzing control `{}`", caller.name);
        let body = mem::take(&mut caller.body);
        let mut locals = Vec::new();
        for local in mem::take(&mut caller.locals) {
            match local {
                Declaration::Instance(instance)
                    if work.decl_to_callee.contains_key(&instance.id) =>
                {
                    let substitutions =
                        self.prepare_control_instance(&body, &instance, work, &mut locals);
                    work.substitutions.insert(instance.id, substitutions);
                }
                other => locals.push(other),
            }
        }
        caller.body = self.rewrite_statements(body, work);
        caller.locals = locals;
    }

    /// Builds the per-instance substitutions and lifts the callee's locals
    /// (renamed) plus any synthesized temporaries into the caller.
    fn prepare_control_instance(
        &mut self,
        caller_body: &[Statement],
        instance: &DeclInstance,
        work: &InlineWork,
        locals: &mut Vec<Declaration>,
    ) -> PerInstanceSubstitutions {
        let callee_container = self.callee(work.decl_to_callee[&instance.id]);
        let Some(callee) = callee_container.as_control() else {
            bug!("control `{}` instantiates a non-control", instance.name);
        };

        let mut substitutions = PerInstanceSubstitutions::default();
        self.bind_constructor(instance, &callee.constructor_parameters, &callee.type_parameters, &mut substitutions);

        let prefix = external_name(&instance.annotations, &instance.name);
        substitutions.rename_map =
            Rc::new(compute_new_names(&prefix, callee_container, self.refs));

        // With a single call site, arguments can be substituted directly,
        // except where two of them might alias: the callee could then observe
        // writes through one argument via the other, which copy-in/copy-out
        // semantics forbid.
        let unique_call = work.unique_caller(instance.id);
        let mut needs_temporary = FxHashSet::default();
        let mut unique_arguments = None;
        if let Some(invocation) = unique_call {
            let Some(call) = find_method_call(caller_body, invocation.statement) else {
                bug!("call site {:?} is not in the caller body", invocation.statement);
            };
            {
                let finder = FindLocationSets::new(self.refs, self.types);
                let sets = callee
                    .apply_parameters
                    .iter()
                    .zip_eq(call.arguments.iter())
                    .map(|(parameter, argument)| (parameter.id, finder.locations(argument)))
                    .collect_vec();
                for (first, first_set) in &sets {
                    for (second, second_set) in &sets {
                        if first != second && first_set.overlaps(second_set) {
                            debug!(
                                "arguments for {first:?} and {second:?} alias; using temporaries",
                            );
                            needs_temporary.insert(*first);
                            needs_temporary.insert(*second);
                        }
                    }
                }
            }
            unique_arguments = Some(call.arguments.clone());
        }

        for (index, parameter) in callee.apply_parameters.iter().enumerate() {
            if parameter.direction == Direction::None {
                continue;
            }
            let direct = unique_arguments
                .as_ref()
                .filter(|_| !needs_temporary.contains(&parameter.id))
                .map(|arguments| arguments[index].clone());
            match direct {
                Some(argument) => {
                    debug!(
                        "substituting callee parameter `{}` with `{argument}`",
                        parameter.name,
                    );
                    substitutions.param_subst.insert(parameter.id, argument);
                }
                None => self.bind_temporary(parameter, &mut substitutions, locals),
            }
        }

        let clone = substitutions.rename_control(self.refs, self.ids, callee);
        locals.extend(clone.locals);
        substitutions
    }

    fn inline_into_parser(&mut self, caller: &mut P4Parser, work: &mut InlineWork) {
        debug!("analyzing parser `{}`", caller.name);
        let mut locals = Vec::new();
        for local in mem::take(&mut caller.locals) {
            match local {
                Declaration::Instance(instance)
                    if work.decl_to_callee.contains_key(&instance.id) =>
                {
                    let callee_container = self.callee(work.decl_to_callee[&instance.id]);
                    let Some(callee) = callee_container.as_parser() else {
                        bug!("parser `{}` instantiates a non-parser", instance.name);
                    };

                    let mut substitutions = PerInstanceSubstitutions::default();
                    self.bind_constructor(
                        &instance,
                        &callee.constructor_parameters,
                        &callee.type_parameters,
                        &mut substitutions,
                    );
                    let prefix = external_name(&instance.annotations, &instance.name);
                    substitutions.rename_map =
                        Rc::new(compute_new_names(&prefix, callee_container, self.refs));

                    // Parser invocations always go through temporaries; the
                    // callee may be entered from several spliced states.
                    for parameter in &callee.apply_parameters {
                        if parameter.direction == Direction::None {
                            continue;
                        }
                        self.bind_temporary(parameter, &mut substitutions, &mut locals);
                    }

                    let clone = substitutions.rename_parser(self.refs, self.ids, callee);
                    locals.extend(clone.locals);
                    work.substitutions.insert(instance.id, substitutions);
                }
                other => locals.push(other),
            }
        }

        let states = mem::take(&mut caller.states);
        caller.states = states
            .into_iter()
            .flat_map(|state| self.splice_state(state, work))
            .collect();
        caller.locals = locals;
    }

    fn bind_constructor(
        &mut self,
        instance: &DeclInstance,
        constructor_parameters: &[Parameter],
        type_parameters: &[String],
        substitutions: &mut PerInstanceSubstitutions,
    ) {
        for (parameter, argument) in constructor_parameters
            .iter()
            .zip_eq(instance.arguments.iter())
        {
            substitutions
                .param_subst
                .insert(parameter.id, argument.clone());
        }
        if let Type::Specialized { arguments, .. } = &instance.ty {
            for (variable, ty) in type_parameters.iter().zip_eq(arguments.iter()) {
                substitutions.tvs.insert(variable.clone(), ty.clone());
            }
        }
    }

    /// Synthesizes a fresh caller local standing in for an apply parameter.
    fn bind_temporary(
        &mut self,
        parameter: &Parameter,
        substitutions: &mut PerInstanceSubstitutions,
        locals: &mut Vec<Declaration>,
    ) {
        let name = self.refs.new_name(&parameter.name);
        debug!("replacing `{}` with `{name}`", parameter.name);
        let ty = substitute_type_vars(&parameter.ty, &substitutions.tvs);
        let variable = self.ids.declaration();
        self.types.set_decl_type(variable, ty.clone());
        let path_id = self.ids.expression();
        self.refs.set_declaration(path_id, variable);
        self.types.set_expr_type(path_id, ty.clone());
        substitutions.param_subst.insert(
            parameter.id,
            Expression {
                id: path_id,
                kind: ExpressionKind::Path {
                    name: name.clone(),
                    absolute: false,
                },
                span: parameter.span,
            },
        );
        substitutions.temporaries.insert(parameter.id);
        locals.push(Declaration::Variable(DeclVariable {
            id: variable,
            name,
            annotations: parameter.annotations.clone(),
            ty,
            initializer: None,
            span: parameter.span,
        }));
    }

    fn rewrite_statements(
        &mut self,
        statements: Vec<Statement>,
        work: &InlineWork,
    ) -> Vec<Statement> {
        statements
            .into_iter()
            .map(|statement| self.rewrite_statement(statement, work))
            .collect()
    }

    fn rewrite_statement(&mut self, statement: Statement, work: &InlineWork) -> Statement {
        let Statement { id, kind, span } = statement;
        let kind = match kind {
            StatementKind::MethodCall(call) if work.call_to_instance.contains_key(&id) => {
                return self.rewrite_call_site(id, span, &call, work);
            }
            StatementKind::Block(mut block) => {
                block.components = self.rewrite_statements(block.components, work);
                StatementKind::Block(block)
            }
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => StatementKind::If {
                condition,
                then_branch: Box::new(self.rewrite_statement(*then_branch, work)),
                else_branch: else_branch
                    .map(|branch| Box::new(self.rewrite_statement(*branch, work))),
            },
            other => other,
        };
        Statement { id, kind, span }
    }

    /// Replaces `instance.apply(...)` with a block: copy-ins and resets, the
    /// callee body under this site's substitutions, then copy-outs.
    fn rewrite_call_site(
        &mut self,
        id: StmtId,
        span: Span,
        call: &MethodCallExpression,
        work: &InlineWork,
    ) -> Statement {
        debug!("inlining invocation {id:?}");
        let instance = work.call_to_instance[&id];
        let callee_container = self.callee(work.decl_to_callee[&instance]);
        let Some(callee) = callee_container.as_control() else {
            // Parser invocations are rewritten by state splicing instead.
            bug!("control invocation of a non-control instance");
        };
        // Clone the substitutions: they are reused for multiple invocations.
        let substitutions = match work.substitutions.get(&instance) {
            Some(substitutions) => substitutions.clone(),
            None => bug!("no substitutions prepared for {instance:?}"),
        };

        let mut components = Vec::new();
        for (parameter, argument) in callee
            .apply_parameters
            .iter()
            .zip_eq(call.arguments.iter())
        {
            match parameter.direction {
                Direction::In | Direction::InOut
                    if substitutions.temporaries.contains(&parameter.id) =>
                {
                    let temporary = substitutions.param_subst[&parameter.id].clone();
                    components.push(assignment(self.ids, temporary, argument.clone(), span));
                }
                Direction::Out => {
                    // The callee must see the parameter as fresh storage.
                    let target = substitutions.param_subst[&parameter.id].clone();
                    let ty = substitute_type_vars(&parameter.ty, &substitutions.tvs);
                    generate_resets(&ty, &target, self.ids, &mut components);
                }
                _ => {}
            }
        }

        let clone = substitutions.rename_control(self.refs, self.ids, callee);
        components.extend(clone.body);

        for (parameter, argument) in callee
            .apply_parameters
            .iter()
            .zip_eq(call.arguments.iter())
        {
            if matches!(parameter.direction, Direction::InOut | Direction::Out)
                && substitutions.temporaries.contains(&parameter.id)
            {
                let temporary = substitutions.param_subst[&parameter.id].clone();
                components.push(assignment(self.ids, argument.clone(), temporary, span));
            }
        }

        // The callee's annotations travel along, except `@name`: that would
        // leak the callee's external identity into the caller's namespace.
        let annotations = callee
            .annotations
            .iter()
            .filter(|annotation| annotation.name != NAME_ANNOTATION)
            .cloned()
            .collect();
        Statement {
            id: self.ids.statement(),
            kind: StatementKind::Block(BlockStatement {
                annotations,
                components,
            }),
            span,
        }
    }

    /// Splits a parser state around each inlined invocation it contains.
    fn splice_state(&mut self, state: ParserState, work: &InlineWork) -> Vec<ParserState> {
        let ParserState {
            id,
            name,
            annotations,
            components,
            transition,
            span,
        } = state;

        let mut fragments: Vec<ParserState> = Vec::new();
        let mut current: Vec<Statement> = Vec::new();
        let mut current_id = id;
        let mut current_name = name.clone();
        let mut current_annotations = annotations;

        for statement in components {
            let inlined = matches!(statement.kind, StatementKind::MethodCall(_))
                && work.call_to_instance.contains_key(&statement.id);
            if !inlined {
                current.push(statement);
                continue;
            }
            let statement_id = statement.id;
            let statement_span = statement.span;
            let StatementKind::MethodCall(call) = statement.kind else {
                unreachable!();
            };
            debug!("inlining invocation {statement_id:?}");

            let instance = work.call_to_instance[&statement_id];
            let callee_container = self.callee(work.decl_to_callee[&instance]);
            let Some(callee) = callee_container.as_parser() else {
                bug!("parser invocation of a non-parser instance");
            };
            // Clone the substitutions: it may be reused for multiple
            // invocations, and directionless bindings are site-specific.
            let mut substitutions = match work.substitutions.get(&instance) {
                Some(substitutions) => substitutions.clone(),
                None => bug!("no substitutions prepared for {instance:?}"),
            };

            // Evaluate in and inout parameters in order.
            for (parameter, argument) in callee
                .apply_parameters
                .iter()
                .zip_eq(call.arguments.iter())
            {
                match parameter.direction {
                    Direction::In | Direction::InOut => {
                        let temporary = substitutions.param_subst[&parameter.id].clone();
                        current.push(assignment(
                            self.ids,
                            temporary,
                            argument.clone(),
                            statement_span,
                        ));
                    }
                    Direction::Out => {
                        let target = substitutions.param_subst[&parameter.id].clone();
                        let ty = substitute_type_vars(&parameter.ty, &substitutions.tvs);
                        generate_resets(&ty, &target, self.ids, &mut current);
                    }
                    Direction::None => {
                        substitutions
                            .param_subst
                            .insert(parameter.id, argument.clone());
                    }
                }
            }

            let renamed = substitutions.rename_parser(self.refs, self.ids, callee);

            let continuation = self.refs.new_name(&format!("post_{name}"));
            let state_renames = compute_new_state_names(self.refs, &renamed, &continuation);
            let renamed = rename_states(renamed, &state_renames);
            let Some(new_start) = state_renames.get(START) else {
                bug!("parser `{}` has no start state", callee.name);
            };

            fragments.push(ParserState {
                id: current_id,
                name: current_name,
                annotations: current_annotations,
                components: mem::take(&mut current),
                transition: Some(Transition::Goto(new_start.clone())),
                span,
            });
            for spliced in renamed.states {
                // The callee's terminal states dissolve: `accept` became the
                // continuation fragment, `reject` stays global.
                if spliced.is_terminal() {
                    continue;
                }
                fragments.push(spliced);
            }

            // Prepare the continuation fragment.
            current_id = self.ids.declaration();
            current_name = continuation;
            current_annotations = Vec::new();

            // Copy back out and inout parameters.
            for (parameter, argument) in callee
                .apply_parameters
                .iter()
                .zip_eq(call.arguments.iter())
            {
                if matches!(parameter.direction, Direction::InOut | Direction::Out) {
                    let temporary = substitutions.param_subst[&parameter.id].clone();
                    current.push(assignment(
                        self.ids,
                        argument.clone(),
                        temporary,
                        statement_span,
                    ));
                }
            }
        }

        if fragments.is_empty() {
            return vec![ParserState {
                id,
                name,
                annotations: current_annotations,
                components: current,
                transition,
                span,
            }];
        }
        fragments.push(ParserState {
            id: current_id,
            name: current_name,
            annotations: current_annotations,
            components: current,
            transition,
            span,
        });
        debug!("replaced state `{name}` with {} states", fragments.len());
        fragments
    }
}

fn assignment(ids: &mut NodeIds, left: Expression, right: Expression, span: Span) -> Statement {
    Statement {
        id: ids.statement(),
        kind: StatementKind::Assignment { left, right },
        span,
    }
}

fn find_method_call(statements: &[Statement], id: StmtId) -> Option<&MethodCallExpression> {
    for statement in statements {
        match &statement.kind {
            StatementKind::MethodCall(call) if statement.id == id => return Some(call),
            StatementKind::Block(block) => {
                if let Some(found) = find_method_call(&block.components, id) {
                    return Some(found);
                }
            }
            StatementKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                if let Some(found) = find_method_call(std::slice::from_ref(then_branch), id) {
                    return Some(found);
                }
                if let Some(branch) = else_branch {
                    if let Some(found) = find_method_call(std::slice::from_ref(branch), id) {
                        return Some(found);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// New names for a callee's states: `accept` becomes the continuation
/// fragment of the enclosing state, `reject` is preserved globally, and
/// everything else is qualified by the callee's name.
fn compute_new_state_names(
    refs: &mut ReferenceMap,
    callee: &P4Parser,
    continuation: &str,
) -> FxHashMap<String, String> {
    let mut renames = FxHashMap::default();
    for state in &callee.states {
        let new_name = match state.name.as_str() {
            ACCEPT => continuation.to_string(),
            REJECT => REJECT.to_string(),
            name => refs.new_name(&format!("{}_{name}", callee.name)),
        };
        renames.insert(state.name.clone(), new_name);
    }
    renames
}

/// Renames state declarations and every syntactic position a state name can
/// occur in: direct transitions and select-case targets. The reference map
/// plays no part here; state paths are not reliably resolvable.
fn rename_states(mut parser: P4Parser, renames: &FxHashMap<String, String>) -> P4Parser {
    for state in &mut parser.states {
        if !state.is_terminal() {
            state.name = renamed_target(renames, &state.name);
        }
        match &mut state.transition {
            Some(Transition::Goto(target)) => *target = renamed_target(renames, target),
            Some(Transition::Select(select)) => {
                for case in &mut select.cases {
                    case.state = renamed_target(renames, &case.state);
                }
            }
            None => {}
        }
    }
    parser
}

fn renamed_target(renames: &FxHashMap<String, String>, target: &str) -> String {
    match renames.get(target) {
        Some(new_name) => new_name.clone(),
        None => bug!("state `{target}` escaped renaming"),
    }
}
