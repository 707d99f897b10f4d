//! Per-check counters and fail-fast detection (spec §4.7).

use crate::types::{CheckId, CheckResult, CheckStats};
use std::collections::HashMap;

#[derive(Default)]
pub struct StatsManager {
    per_check: HashMap<CheckId, CheckStats>,
}

impl StatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed invocation for `check_id`.
    pub fn record(&mut self, check_id: &str, result: &CheckResult, duration_ms: u64) {
        let entry = self.per_check.entry(check_id.to_string()).or_insert_with(|| CheckStats {
            check_id: check_id.to_string(),
            ..Default::default()
        });
        entry.total_runs += 1;
        entry.duration_ms += duration_ms;
        if result.skipped {
            entry.skipped += 1;
        } else if result.has_fatal_issue() {
            entry.failures += 1;
            entry.fatal = true;
        } else {
            entry.success_runs += 1;
        }
    }

    pub fn snapshot(&self) -> Vec<CheckStats> {
        let mut stats: Vec<CheckStats> = self.per_check.values().cloned().collect();
        stats.sort_by(|a, b| a.check_id.cmp(&b.check_id));
        stats
    }

    /// True if any non-skipped, non-forEach-aggregate result in `results`
    /// carries a fatal issue (spec §4.7).
    pub fn fail_fast(results: &[(CheckId, CheckResult)]) -> bool {
        results
            .iter()
            .any(|(_, r)| !r.skipped && !r.is_for_each && r.has_fatal_issue())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Issue;

    #[test]
    fn fail_fast_ignores_skipped_and_aggregate_results() {
        let skipped = CheckResult::skipped_dependency_failed();
        let mut aggregate = CheckResult {
            output: Some(serde_json::json!([])),
            is_for_each: true,
            ..Default::default()
        };
        aggregate.issues.push(Issue::fatal("x/error", "boom"));
        let results = vec![("a".to_string(), skipped), ("b".to_string(), aggregate)];
        assert!(!StatsManager::fail_fast(&results));
    }

    #[test]
    fn fail_fast_detects_plain_fatal_result() {
        let mut result = CheckResult::default();
        result.issues.push(Issue::fatal("cmd/execution_error", "boom"));
        let results = vec![("a".to_string(), result)];
        assert!(StatsManager::fail_fast(&results));
    }

    #[test]
    fn record_tracks_counters() {
        let mut stats = StatsManager::new();
        stats.record("a", &CheckResult::default(), 10);
        let mut failing = CheckResult::default();
        failing.issues.push(Issue::fatal("a/error", "x"));
        stats.record("a", &failing, 5);
        let snap = stats.snapshot();
        assert_eq!(snap[0].total_runs, 2);
        assert_eq!(snap[0].success_runs, 1);
        assert_eq!(snap[0].failures, 1);
        assert!(snap[0].fatal);
    }
}
