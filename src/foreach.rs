//! Dynamic fan-out/aggregation for `forEach` checks (spec §4.5).
//!
//! Per-iteration scopes are ordinary [`Scope`] children; zipping a dependent
//! against a *second* forEach ancestor is implemented by having the engine
//! write that ancestor's `i`-th iteration value (or an "undefined" result
//! past its own length) as a journal entry at the dependent's own scope —
//! after that, [`crate::journal`]'s ordinary prefix resolution does the rest,
//! so this module only computes scopes and aggregates, it does not special-
//! case reads.

use crate::types::{CheckId, CheckResult, Scope};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct NotAList(pub JsonValue);

/// Computes per-iteration children and aggregates their results back.
pub struct ForEachProcessor;

impl ForEachProcessor {
    /// A forEach parent's output must be a JSON array; anything else is a
    /// configuration-time shape error surfaced as a fatal issue by the caller.
    pub fn iteration_items(output: &JsonValue) -> Result<&Vec<JsonValue>, NotAList> {
        match output {
            JsonValue::Array(items) => Ok(items),
            other => Err(NotAList(other.clone())),
        }
    }

    /// The scopes `s + {parent, 0..N-1}` that an immediate dependent fans out
    /// to under `parent_id` (spec §4.5, first bullet).
    pub fn child_scopes(parent_id: &str, base_scope: &Scope, count: usize) -> Vec<Scope> {
        (0..count).map(|i| base_scope.child(parent_id, i)).collect()
    }

    /// The value a zipped dependent sees for a *second* forEach ancestor at
    /// iteration `index`: that ancestor's own `index`-th result, or an empty
    /// ("undefined") result once `index` runs past its own fan-out length
    /// (DESIGN.md Open Question decision 1).
    pub fn zipped_entry(other_parent_iterations: &[CheckResult], index: usize) -> CheckResult {
        other_parent_iterations.get(index).cloned().unwrap_or_default()
    }

    /// Builds the single aggregated, `isForEach` journal entry written at the
    /// parent scope once every iteration of a dependent has completed
    /// (spec §4.5 "Aggregation").
    pub fn aggregate(iteration_outputs: &[CheckResult]) -> CheckResult {
        let outputs: Vec<JsonValue> = iteration_outputs
            .iter()
            .map(|r| r.output.clone().unwrap_or(JsonValue::Null))
            .collect();
        CheckResult {
            output: Some(JsonValue::Array(outputs)),
            is_for_each: true,
            ..Default::default()
        }
    }
}

/// Tracks which forEach parents have already dispatched their `on_finish`
/// block this run, so it fires exactly once (spec §4.5 "on_finish").
#[derive(Default)]
pub struct OnFinishTracker {
    fired: HashSet<(CheckId, Scope)>,
}

impl OnFinishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time it is called for `(parent_id, scope)`
    /// with `all_iterations_complete == true`; `false` every other time,
    /// including before completion (caller keeps polling each wave).
    pub fn should_fire(&mut self, parent_id: &str, scope: &Scope, all_iterations_complete: bool) -> bool {
        if !all_iterations_complete {
            return false;
        }
        let key = (parent_id.to_string(), scope.clone());
        if self.fired.contains(&key) {
            return false;
        }
        self.fired.insert(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scopes_enumerate_each_iteration() {
        let base = Scope::root();
        let scopes = ForEachProcessor::child_scopes("files", &base, 3);
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes[1], base.child("files", 1));
    }

    #[test]
    fn zipped_entry_is_undefined_past_shorter_parent_length() {
        let short = vec![CheckResult {
            output: Some(serde_json::json!("only-one")),
            ..Default::default()
        }];
        let first = ForEachProcessor::zipped_entry(&short, 0);
        assert_eq!(first.output, Some(serde_json::json!("only-one")));
        let past_end = ForEachProcessor::zipped_entry(&short, 5);
        assert_eq!(past_end.output, None);
    }

    #[test]
    fn aggregate_collects_outputs_in_order_and_marks_for_each() {
        let iterations = vec![
            CheckResult {
                output: Some(serde_json::json!("a")),
                ..Default::default()
            },
            CheckResult {
                output: Some(serde_json::json!("b")),
                ..Default::default()
            },
        ];
        let agg = ForEachProcessor::aggregate(&iterations);
        assert!(agg.is_for_each);
        assert_eq!(agg.output, Some(serde_json::json!(["a", "b"])));
    }

    #[test]
    fn on_finish_fires_exactly_once() {
        let mut tracker = OnFinishTracker::new();
        let scope = Scope::root();
        assert!(!tracker.should_fire("files", &scope, false));
        assert!(tracker.should_fire("files", &scope, true));
        assert!(!tracker.should_fire("files", &scope, true));
    }

    #[test]
    fn iteration_items_rejects_non_array_output() {
        let err = ForEachProcessor::iteration_items(&serde_json::json!("not-a-list")).unwrap_err();
        assert_eq!(err.0, serde_json::json!("not-a-list"));
    }
}
