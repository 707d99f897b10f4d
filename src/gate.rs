//! Computes a check's scoped dependency results, and whether it should be
//! skipped because a dependency is missing or fatal (spec §4.6).

use crate::graph::Graph;
use crate::journal::{ContextView, OutputJournal, Snapshot};
use crate::types::{CheckId, CheckResult, Scope};
use std::collections::HashMap;

pub enum GateOutcome {
    Ready(HashMap<CheckId, CheckResult>),
    /// A dependency was missing or fatal at the reader's scope.
    Skip,
}

pub struct DependencyGate;

impl DependencyGate {
    /// Builds the scoped dependency map for `check_id` at `scope`, and the
    /// view the caller can reuse for condition evaluation (spec §4.6).
    pub fn build(
        journal: &OutputJournal,
        graph: &Graph,
        check_id: &str,
        scope: &Scope,
        snapshot: Snapshot,
    ) -> (GateOutcome, ContextView) {
        let view = journal.view(snapshot, scope.clone());
        let dependency_ids = graph
            .nodes
            .get(check_id)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();

        let mut deps = HashMap::new();
        for dep_id in dependency_ids {
            match view.get(&dep_id) {
                None => return (GateOutcome::Skip, view),
                Some(result) if result.has_fatal_issue() || result.is_dependency_failure() => {
                    return (GateOutcome::Skip, view)
                }
                Some(result) => {
                    deps.insert(dep_id, result);
                }
            }
        }
        (GateOutcome::Ready(deps), view)
    }
}
