//! Scheduling of inlining work.
//!
//! Discovery produces one [`InlineWorkItem`] per (caller, callee, instance)
//! triple. The worklist orders callers so that leaves of the call graph come
//! first, then hands out batches: at the moment an invocation of a callee is
//! rewritten, that callee has already been fully inlined itself. A batch
//! never contains an item whose callee already participates in the batch,
//! because inlining into a container invalidates every item that still wants
//! to read it.

use super::substitutions::PerInstanceSubstitutions;
use crate::{
    error::{ErrorSink, InlineError},
    ir::{DeclId, StmtId},
    position::Span,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// One call site of an inlinable instance.
#[derive(Clone, Copy, Debug)]
pub struct Invocation {
    pub statement: StmtId,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct InlineWorkItem {
    pub caller: DeclId,
    pub callee: DeclId,
    pub instance: DeclId,
    pub instance_name: String,
    pub invocations: Vec<Invocation>,
}

/// Everything discovery found, keyed by instance. Each instance declaration
/// maps to exactly one callee container.
#[derive(Debug, Default)]
pub struct InlineList {
    items: Vec<InlineWorkItem>,
    by_instance: FxHashMap<DeclId, usize>,
}

impl InlineList {
    pub fn add_instantiation(
        &mut self,
        caller: DeclId,
        callee: DeclId,
        instance: DeclId,
        instance_name: &str,
    ) {
        debug!("will inline `{instance_name}` ({callee:?} into {caller:?})");
        self.by_instance.insert(instance, self.items.len());
        self.items.push(InlineWorkItem {
            caller,
            callee,
            instance,
            instance_name: instance_name.to_string(),
            invocations: Vec::new(),
        });
    }

    /// Records a call site. Invocations of instances that were never
    /// registered (externs, non-inlinable blocks) are ignored.
    pub fn add_invocation(&mut self, instance: DeclId, invocation: Invocation) {
        if let Some(&index) = self.by_instance.get(&instance) {
            self.items[index].invocations.push(invocation);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-caller view of one batch.
#[derive(Debug, Default)]
pub struct InlineWork {
    pub decl_to_callee: FxHashMap<DeclId, DeclId>,
    pub call_to_instance: FxHashMap<StmtId, DeclId>,
    pub invocations: FxHashMap<DeclId, Vec<Invocation>>,
    /// Filled in while the caller is prepared, reused at each call site.
    pub substitutions: FxHashMap<DeclId, PerInstanceSubstitutions>,
}

impl InlineWork {
    /// The single call site of `instance`, when exactly one exists.
    #[must_use]
    pub fn unique_caller(&self, instance: DeclId) -> Option<Invocation> {
        match self.invocations.get(&instance).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }
}

/// A batch of non-conflicting inlinings, grouped by caller.
#[derive(Debug, Default)]
pub struct InlineSummary {
    pub caller_work: FxHashMap<DeclId, InlineWork>,
}

impl InlineSummary {
    fn add(&mut self, item: InlineWorkItem) {
        let work = self.caller_work.entry(item.caller).or_default();
        work.decl_to_callee.insert(item.instance, item.callee);
        for invocation in &item.invocations {
            work.call_to_instance.insert(invocation.statement, item.instance);
        }
        work.invocations.insert(item.instance, item.invocations);
    }
}

/// The scheduled queue the driver drains.
#[derive(Debug)]
pub struct InlineWorkList {
    /// Items in reverse processing order; `next` pops from the back.
    to_inline: Vec<InlineWorkItem>,
}

impl InlineWorkList {
    /// Builds the schedule: call-graph edges per invoked instance, callers
    /// topologically sorted leaves first.
    pub fn build(list: InlineList, allow_multiple_calls: bool, sink: &mut ErrorSink) -> Self {
        let mut graph = CallGraph::default();
        let mut scheduled = Vec::new();
        for item in list.items {
            if item.invocations.is_empty() {
                // Dead instance; there is nothing to splice it into.
                continue;
            }
            if !allow_multiple_calls && item.invocations.len() > 1 {
                sink.error(
                    item.invocations[1].span,
                    InlineError::MultipleInvocations {
                        instance: item.instance_name.clone(),
                    },
                );
                continue;
            }
            graph.calls(item.caller, item.callee);
            scheduled.push(item);
        }

        // Inline from the leaves up.
        let order = graph.sorted();
        let mut to_inline = Vec::with_capacity(scheduled.len());
        for container in order {
            for item in &scheduled {
                if item.caller == container {
                    to_inline.push(item.clone());
                }
            }
        }
        to_inline.reverse();
        Self { to_inline }
    }

    /// The next batch, or `None` once everything has been handed out.
    pub fn next(&mut self) -> Option<InlineSummary> {
        if self.to_inline.is_empty() {
            return None;
        }
        let mut summary = InlineSummary::default();
        let mut processing = FxHashSet::default();
        while let Some(item) = self.to_inline.last() {
            if processing.contains(&item.callee) {
                break;
            }
            let item = self.to_inline.pop().unwrap();
            processing.insert(item.caller);
            processing.insert(item.callee);
            summary.add(item);
        }
        Some(summary)
    }
}

/// Caller-to-callee edges between containers, with a deterministic
/// topological order.
#[derive(Debug, Default)]
struct CallGraph {
    nodes: Vec<DeclId>,
    edges: FxHashMap<DeclId, Vec<DeclId>>,
}

impl CallGraph {
    fn calls(&mut self, caller: DeclId, callee: DeclId) {
        self.node(caller);
        self.node(callee);
        let successors = self.edges.entry(caller).or_default();
        if !successors.contains(&callee) {
            successors.push(callee);
        }
    }

    fn node(&mut self, node: DeclId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    /// Nodes with callees before their callers.
    fn sorted(&self) -> Vec<DeclId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = FxHashSet::default();
        for &node in &self.nodes {
            self.visit(node, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, node: DeclId, visited: &mut FxHashSet<DeclId>, order: &mut Vec<DeclId>) {
        if !visited.insert(node) {
            return;
        }
        if let Some(successors) = self.edges.get(&node) {
            for &successor in successors {
                self.visit(successor, visited, order);
            }
        }
        order.push(node);
    }
}
