//! Property tests for the ten universal properties of the check execution
//! engine. Properties 5 (prefix visibility), 9 (condition fail-secure), and
//! 10 (snapshot isolation) are already covered by unit tests in
//! `src/journal.rs` and `src/condition.rs` and are not duplicated here.

use checkgraph::test_support::MockProvider;
use checkgraph::{
    CheckDefinition, EngineConfig, EngineError, EventInfo, Graph, Provider, ProviderRegistry, RoutingBlock,
    RoutingConfig,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn check(id: &str, deps: &[&str]) -> CheckDefinition {
    CheckDefinition {
        id: id.to_string(),
        check_type: "mock".to_string(),
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
        if_expr: None,
        for_each: false,
        on_fail: RoutingBlock::default(),
        on_success: RoutingBlock::default(),
        on_finish: RoutingBlock::default(),
        session_provider: None,
        tags: vec![],
        timeout_ms: None,
        provider_config: serde_json::Value::Null,
    }
}

fn config_with(checks: Vec<CheckDefinition>) -> EngineConfig {
    let mut cfg = EngineConfig::new("1.0");
    for c in checks {
        cfg.checks.insert(c.id.clone(), c);
    }
    cfg
}

fn registry(mock: &Arc<MockProvider>) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new();
    reg.register("mock", mock.clone() as Arc<dyn Provider>);
    reg
}

/// A small random DAG-or-not edge set over a fixed node range, used by
/// properties 1 and 3: `edges[i]` names the (possibly absent) parents of
/// node `i`, drawn only from nodes `< i` (acyclic) or, when `allow_back` is
/// set, also from nodes `>= i` (introduces a cycle).
fn chain_defs(n: usize, back_edge: Option<(usize, usize)>) -> HashMap<String, CheckDefinition> {
    let mut defs = HashMap::new();
    for i in 0..n {
        let id = format!("n{i}");
        let deps: Vec<String> = if i == 0 { vec![] } else { vec![format!("n{}", i - 1)] };
        defs.insert(id.clone(), check(&id, &deps.iter().map(|s| s.as_str()).collect::<Vec<_>>()));
    }
    if let Some((from, to)) = back_edge {
        let id = format!("n{from}");
        let existing = defs.get(&id).unwrap().depends_on.clone();
        let mut merged = existing;
        merged.push(format!("n{to}"));
        defs.get_mut(&id).unwrap().depends_on = merged;
    }
    defs
}

proptest! {
    /// Property 1: Acyclicity enforcement. A chain of `n` nodes with no back
    /// edge always builds; adding a back edge from an earlier node to a
    /// later one always introduces a cycle and is rejected.
    #[test]
    fn acyclicity_enforcement(n in 2usize..8, back_from in 0usize..7, back_to in 0usize..7) {
        let acyclic = chain_defs(n, None);
        let last = format!("n{}", n - 1);
        prop_assert!(Graph::build(&acyclic, std::slice::from_ref(&last)).is_ok());

        if back_from < n && back_to < n && back_from <= back_to {
            // n{back_from} depending on n{back_to} (back_to >= back_from) is
            // either a self-loop or a forward-pointing back edge; both close
            // a cycle through the existing chain edges.
            let cyclic = chain_defs(n, Some((back_from, back_to)));
            let result = Graph::build(&cyclic, &[last]);
            prop_assert!(matches!(result, Err(EngineError::Cycle(_))));
        }
    }

    /// Property 7: Dependency-failure propagation. A fatal failure at the
    /// head of a chain of length `n` must skip every downstream check with a
    /// `dependency_failed` error, and the provider must never be invoked for
    /// any of them.
    #[test]
    fn dependency_failure_propagates_through_chain(n in 2usize..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mock = Arc::new(MockProvider::new());
            mock.script("n0", vec![MockProvider::fails_fatal("n0/error")]);

            let defs: Vec<CheckDefinition> = (0..n)
                .map(|i| {
                    let id = format!("n{i}");
                    let deps: Vec<String> = if i == 0 { vec![] } else { vec![format!("n{}", i - 1)] };
                    check(&id, &deps.iter().map(|s| s.as_str()).collect::<Vec<_>>())
                })
                .collect();
            let cfg = config_with(defs);
            let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
            let last = format!("n{}", n - 1);
            let result = engine.run(&EventInfo::default(), &[last]).await.unwrap();

            let calls = mock.calls.lock().unwrap();
            prop_assert_eq!(calls.as_slice(), &["n0".to_string()]);
            prop_assert_eq!(result.checks_executed.len(), n);
            Ok(())
        })?;
    }

    /// Property 4: Loop budget respected. With a self-re-running `onFail`
    /// block and a fatal provider, the number of provider invocations never
    /// exceeds `max_loops + 1` (the initial attempt plus each granted loop),
    /// and the engine always terminates rather than looping forever.
    #[test]
    fn loop_budget_bounds_total_attempts(max_loops in 0u32..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mock = Arc::new(MockProvider::new());
            mock.script("build", vec![MockProvider::fails_fatal("build/error")]);

            let mut build = check("build", &[]);
            build.on_fail = RoutingBlock {
                run: vec!["build".to_string()],
                ..Default::default()
            };
            let mut cfg = config_with(vec![build]);
            cfg.routing = RoutingConfig {
                max_loops,
                defaults: Default::default(),
            };
            let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
            let result = engine.run(&EventInfo::default(), &["build".to_string()]).await.unwrap();

            let calls = mock.calls.lock().unwrap().len() as u32;
            prop_assert!(calls <= max_loops + 1);
            if max_loops > 0 {
                prop_assert!(result.review_summary.issues.iter().any(|i| i.rule_id == "routing/loop_budget"));
            }
            Ok(())
        })?;
    }

    /// Property 6: ForEach aggregation. A forEach parent producing a list of
    /// length `n` must, once its dependent completes at every iteration,
    /// expose an aggregate entry to outside readers whose output array has
    /// exactly `n` elements in index order.
    #[test]
    fn for_each_aggregate_has_one_entry_per_iteration(n in 0usize..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mock = Arc::new(MockProvider::new());
            let items: Vec<serde_json::Value> = (0..n).map(|i| serde_json::json!(i)).collect();
            mock.script("root", vec![MockProvider::always_succeeds_with(serde_json::json!(items))]);

            let mut root = check("root", &[]);
            root.for_each = true;
            let child = check("child", &["root"]);
            let outside = check("outside", &["child"]);

            let cfg = config_with(vec![root, child, outside]);
            let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
            let result = engine.run(&EventInfo::default(), &["outside".to_string()]).await.unwrap();

            prop_assert!(result.checks_executed.contains(&"outside".to_string()));
            let calls = mock.calls.lock().unwrap();
            prop_assert_eq!(calls.iter().filter(|c| *c == "child").count(), n);
            Ok(())
        })?;
    }
}

/// Property 3: Ancestor-only goto. A `goto` target that is not an ancestor
/// of its source, with no `run`/`runExpr` ahead of it, must be rejected at
/// Init before any check executes.
#[tokio::test]
async fn non_ancestor_goto_rejected_at_init() {
    let mock = Arc::new(MockProvider::new());
    let mut build = check("build", &[]);
    build.on_fail = RoutingBlock {
        goto: Some("sibling".to_string()),
        ..Default::default()
    };
    let sibling = check("sibling", &[]);

    let cfg = config_with(vec![build, sibling]);
    let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
    let err = engine.run(&EventInfo::default(), &["build".to_string()]).await.unwrap_err();
    assert!(matches!(err, EngineError::NonAncestorGoto { .. }));
    assert!(mock.calls.lock().unwrap().is_empty());
}

/// Property 3, converse: a `goto` target that *is* an ancestor is accepted
/// and the engine runs to completion.
#[tokio::test]
async fn ancestor_goto_accepted() {
    let mock = Arc::new(MockProvider::new());
    mock.script("build", vec![MockProvider::fails_fatal("build/error"), MockProvider::always_succeeds_with(serde_json::json!("ok"))]);

    let setup = check("setup", &[]);
    let mut build = check("build", &["setup"]);
    build.on_fail = RoutingBlock {
        goto: Some("setup".to_string()),
        ..Default::default()
    };

    let cfg = config_with(vec![setup, build]);
    let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
    let result = engine.run(&EventInfo::default(), &["build".to_string()]).await.unwrap();
    assert!(result.checks_executed.iter().filter(|c| *c == "build").count() >= 2);
}

/// Property 2: At-most-once per wave per scope. Across a run with forEach
/// fan-out and routing, no two journal entries for the same `(check_id,
/// scope)` share a `wave_of_production` — each wave writes at most one
/// result per check per scope.
#[tokio::test]
async fn at_most_once_per_wave_per_scope() {
    let mock = Arc::new(MockProvider::new());
    mock.script(
        "root",
        vec![MockProvider::always_succeeds_with(serde_json::json!([1, 2, 3]))],
    );
    mock.script("build", vec![MockProvider::fails_fatal("build/error"), MockProvider::always_succeeds_with(serde_json::json!("ok"))]);

    let mut root = check("root", &[]);
    root.for_each = true;
    let setup = check("setup", &[]);
    let mut build = check("build", &["setup", "root"]);
    build.on_fail = RoutingBlock {
        goto: Some("setup".to_string()),
        ..Default::default()
    };

    let cfg = config_with(vec![root, setup, build]);
    let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
    let (_, entries) =
        checkgraph::test_support::run_with_journal(&mut engine, &EventInfo::default(), &["build".to_string()])
            .await
            .unwrap();

    let mut seen = std::collections::HashSet::new();
    for entry in &entries {
        let key = (entry.check_id.clone(), entry.scope.clone(), entry.wave_of_production);
        assert!(seen.insert(key), "two entries shared a (check_id, scope, wave)");
    }

    let calls = mock.calls.lock().unwrap();
    assert!(calls.iter().filter(|c| *c == "build").count() >= 2);
}

/// Property 8: Idempotent re-runs under goto. After a goto jump reruns an
/// ancestor, the source check is reattempted exactly once per jump, not
/// repeatedly, before routing is evaluated again for that attempt.
#[tokio::test]
async fn goto_reattempts_source_exactly_once_per_jump() {
    let mock = Arc::new(MockProvider::new());
    mock.script(
        "build",
        vec![
            MockProvider::fails_fatal("build/error"),
            MockProvider::always_succeeds_with(serde_json::json!("ok")),
        ],
    );

    let setup = check("setup", &[]);
    let mut build = check("build", &["setup"]);
    build.on_fail = RoutingBlock {
        goto: Some("setup".to_string()),
        ..Default::default()
    };

    let cfg = config_with(vec![setup, build]);
    let mut engine = checkgraph::Engine::new(cfg, registry(&mock));
    let result = engine.run(&EventInfo::default(), &["build".to_string()]).await.unwrap();

    let calls = mock.calls.lock().unwrap();
    // One initial failing attempt, one jump-triggered re-attempt that
    // succeeds: exactly two invocations of `build`, not more.
    assert_eq!(calls.iter().filter(|c| *c == "build").count(), 2);
    assert_eq!(calls.iter().filter(|c| *c == "setup").count(), 2);
    assert_eq!(result.checks_executed.iter().filter(|c| *c == "build").count(), 2);
}
