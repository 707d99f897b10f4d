//! Retry/run/goto routing decisions and the per-scope loop budget (spec §4.4).
//!
//! Expression resolution (`runExpr`/`gotoExpr`) and ancestor validation for
//! `goto` both need the condition evaluator and the dependency graph, so
//! callers resolve a [`RoutingBlock`] into a [`ResolvedRouting`] first; this
//! module only decides what to do with the resolved ids, keeping it
//! synchronous and independently testable.

use crate::config::{BackoffMode, RetrySpec, RoutingBlock};
use crate::types::{CheckId, Scope};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// `run`/`runExpr` merged (deduplicated, first occurrence wins) and
/// `goto`/`gotoExpr` resolved to a single target, by the caller.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRouting {
    pub run_ids: Vec<CheckId>,
    pub goto_target: Option<CheckId>,
    pub goto_event: Option<String>,
}

impl ResolvedRouting {
    /// Merges `block.run` with the already-evaluated `run_expr` ids,
    /// deduplicating while preserving first occurrence (spec §4.4.2).
    pub fn resolve(block: &RoutingBlock, run_expr_ids: Vec<CheckId>, goto_expr_target: Option<CheckId>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let run_ids = block
            .run
            .iter()
            .cloned()
            .chain(run_expr_ids)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        ResolvedRouting {
            run_ids,
            goto_target: block.goto.clone().or(goto_expr_target),
            goto_event: block.goto_event.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOutcome {
    Retry { delay: Duration },
    Run { ids: Vec<CheckId>, reattempt_source: bool },
    Goto { target: CheckId, event_override: Option<String> },
    None,
    LoopBudgetExceeded,
}

/// Holds `attemptCounters` and `loopCounters`, both keyed by scope so
/// forEach iterations never share state (spec §4.4, DESIGN.md decision 3).
#[derive(Default)]
pub struct RoutingEvaluator {
    attempt_counters: HashMap<(CheckId, Scope), u32>,
    loop_counters: HashMap<Scope, u32>,
}

impl RoutingEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides the single outcome for one completed check, given its
    /// matching routing block already resolved. `reattempt_after_run` should
    /// be `true` only for an `onFail` block's `run` action (spec §4.4.2).
    pub fn decide(
        &mut self,
        check_id: &str,
        scope: &Scope,
        block: &RoutingBlock,
        resolved: &ResolvedRouting,
        max_loops: u32,
        reattempt_after_run: bool,
    ) -> RoutingOutcome {
        // A `goto` paired with `retry` uses the retry spec as an attempt
        // budget and backoff gate in front of the jump, rather than as an
        // independent same-check re-enqueue (spec §4.4.2: retry and goto in
        // the same block route through the goto once attempts remain).
        if resolved.run_ids.is_empty() {
            if let Some(target) = &resolved.goto_target {
                if let Some(retry) = &block.retry {
                    let key = (check_id.to_string(), scope.clone());
                    let attempts = *self.attempt_counters.get(&key).unwrap_or(&0);
                    if attempts >= retry.max {
                        return RoutingOutcome::None;
                    }
                    self.attempt_counters.insert(key, attempts + 1);
                }
                if !self.charge_loop_budget(scope, max_loops) {
                    return RoutingOutcome::LoopBudgetExceeded;
                }
                return RoutingOutcome::Goto {
                    target: target.clone(),
                    event_override: resolved.goto_event.clone(),
                };
            }
        }

        if let Some(retry) = &block.retry {
            let key = (check_id.to_string(), scope.clone());
            let attempts = *self.attempt_counters.get(&key).unwrap_or(&0);
            if attempts < retry.max {
                if !self.charge_loop_budget(scope, max_loops) {
                    return RoutingOutcome::LoopBudgetExceeded;
                }
                self.attempt_counters.insert(key, attempts + 1);
                return RoutingOutcome::Retry {
                    delay: backoff_delay(retry, attempts + 1),
                };
            }
        }

        if !resolved.run_ids.is_empty() {
            if !self.charge_loop_budget(scope, max_loops) {
                return RoutingOutcome::LoopBudgetExceeded;
            }
            return RoutingOutcome::Run {
                ids: resolved.run_ids.clone(),
                reattempt_source: reattempt_after_run,
            };
        }

        if let Some(target) = &resolved.goto_target {
            if !self.charge_loop_budget(scope, max_loops) {
                return RoutingOutcome::LoopBudgetExceeded;
            }
            return RoutingOutcome::Goto {
                target: target.clone(),
                event_override: resolved.goto_event.clone(),
            };
        }

        RoutingOutcome::None
    }

    fn charge_loop_budget(&mut self, scope: &Scope, max_loops: u32) -> bool {
        let counter = self.loop_counters.entry(scope.clone()).or_insert(0);
        if *counter >= max_loops {
            return false;
        }
        *counter += 1;
        true
    }
}

/// `delayMs` for fixed, `delayMs × 2^(attempt-1)` for exponential, plus small
/// deterministic-range jitter (spec §4.4.1).
fn backoff_delay(retry: &RetrySpec, attempt: u32) -> Duration {
    let base = match retry.backoff.mode {
        BackoffMode::Fixed => retry.backoff.delay_ms,
        BackoffMode::Exponential => retry.backoff.delay_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(32)),
    };
    let jitter = rand::thread_rng().gen_range(0..=(base / 10).max(1));
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;

    fn retry_block(max: u32, mode: BackoffMode, delay_ms: u64) -> RoutingBlock {
        RoutingBlock {
            retry: Some(RetrySpec {
                max,
                backoff: Backoff { mode, delay_ms },
            }),
            ..Default::default()
        }
    }

    #[test]
    fn retries_until_max_then_falls_through() {
        let mut evaluator = RoutingEvaluator::new();
        let block = retry_block(2, BackoffMode::Fixed, 100);
        let resolved = ResolvedRouting::default();
        let scope = Scope::root();

        let first = evaluator.decide("build", &scope, &block, &resolved, 10, false);
        assert!(matches!(first, RoutingOutcome::Retry { .. }));
        let second = evaluator.decide("build", &scope, &block, &resolved, 10, false);
        assert!(matches!(second, RoutingOutcome::Retry { .. }));
        let third = evaluator.decide("build", &scope, &block, &resolved, 10, false);
        assert_eq!(third, RoutingOutcome::None);
    }

    #[test]
    fn run_takes_priority_over_goto() {
        let mut evaluator = RoutingEvaluator::new();
        let block = RoutingBlock::default();
        let resolved = ResolvedRouting {
            run_ids: vec!["lint".to_string()],
            goto_target: Some("start".to_string()),
            goto_event: None,
        };
        let outcome = evaluator.decide("build", &Scope::root(), &block, &resolved, 10, true);
        match outcome {
            RoutingOutcome::Run { ids, reattempt_source } => {
                assert_eq!(ids, vec!["lint".to_string()]);
                assert!(reattempt_source);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn goto_applies_when_no_retry_or_run() {
        let mut evaluator = RoutingEvaluator::new();
        let block = RoutingBlock::default();
        let resolved = ResolvedRouting {
            run_ids: vec![],
            goto_target: Some("start".to_string()),
            goto_event: Some("pull_request".to_string()),
        };
        let outcome = evaluator.decide("build", &Scope::root(), &block, &resolved, 10, false);
        assert_eq!(
            outcome,
            RoutingOutcome::Goto {
                target: "start".to_string(),
                event_override: Some("pull_request".to_string()),
            }
        );
    }

    #[test]
    fn loop_budget_exhausts_independently_per_scope() {
        let mut evaluator = RoutingEvaluator::new();
        let resolved = ResolvedRouting {
            run_ids: vec!["lint".to_string()],
            goto_target: None,
            goto_event: None,
        };
        let block = RoutingBlock::default();
        let scope_a = Scope::root().child("fe", 0);
        let scope_b = Scope::root().child("fe", 1);

        for _ in 0..3 {
            let outcome = evaluator.decide("build", &scope_a, &block, &resolved, 3, false);
            assert!(matches!(outcome, RoutingOutcome::Run { .. }));
        }
        let exhausted = evaluator.decide("build", &scope_a, &block, &resolved, 3, false);
        assert_eq!(exhausted, RoutingOutcome::LoopBudgetExceeded);

        // Sibling scope is unaffected.
        let sibling = evaluator.decide("build", &scope_b, &block, &resolved, 3, false);
        assert!(matches!(sibling, RoutingOutcome::Run { .. }));
    }

    #[test]
    fn run_ids_deduplicate_preserving_first_occurrence() {
        let block = RoutingBlock {
            run: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let resolved = ResolvedRouting::resolve(&block, vec!["b".to_string(), "c".to_string()], None);
        assert_eq!(resolved.run_ids, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
