//! The engine state machine: Init → WavePlanning → LevelDispatch →
//! RoutingApply → Completed/Stopped (spec §4.9).

use crate::condition::{evaluate_bool, evaluate_string, evaluate_string_list, EvalContext};
use crate::config::{CheckDefinition, EngineConfig, EventInfo, RoutingBlock};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::foreach::{ForEachProcessor, OnFinishTracker};
use crate::gate::{DependencyGate, GateOutcome};
use crate::graph::Graph;
use crate::journal::{OutputJournal, Snapshot};
use crate::provider::{ExecContext, ProviderRegistry};
use crate::routing::{ResolvedRouting, RoutingEvaluator, RoutingOutcome};
use crate::stats::StatsManager;
use crate::types::{AnalysisResult, CheckId, CheckResult, JournalSummary, ReviewSummary, Scope};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// One unit of dispatch within a level: an independent check, or a session
/// group that must run sequentially relative to other groups (spec §4.8).
enum DispatchUnit {
    Single((CheckId, Scope)),
    SessionGroup(Vec<(CheckId, Scope)>),
}

/// A queued wave entry. `Auto` re-derives its scope set from its
/// dependencies' current leaf scopes at dispatch time, which is how a plain
/// topological level picks up forEach fan-out without the engine tracking it
/// explicitly; `At` forces a specific scope, for routing-driven re-execution
/// (retry/run/goto) where the scope is the trigger's own, not derived
/// (spec §4.4, §4.5).
#[derive(Debug, Clone)]
enum QueueItem {
    Auto(CheckId),
    At(CheckId, Scope),
}

/// A pending re-attempt of a check, released once its trigger checks all
/// succeed (spec §4.4.2: "if the `run` steps all succeed, the original
/// failed check is re-attempted once").
struct PendingRunReattempt {
    trigger: Vec<(CheckId, Scope)>,
    reattempt: (CheckId, Scope),
}

/// Bookkeeping for one forEach parent's fan-out, used to detect when all of
/// its immediate dependents' iterations are done (spec §4.5 "on_finish").
struct ForEachFanOut {
    dependents: HashSet<CheckId>,
    len: usize,
}

pub struct Engine {
    config: EngineConfig,
    providers: ProviderRegistry,
    events: EventSink,
}

impl Engine {
    pub fn new(config: EngineConfig, providers: ProviderRegistry) -> Self {
        Engine {
            config,
            providers,
            events: EventSink::new(),
        }
    }

    pub fn subscribe(&mut self) -> crate::events::EventReceiver {
        self.events.subscribe()
    }

    /// Runs the engine to completion for the given requested checks,
    /// returning the result the caller encodes/reports (spec §6).
    pub async fn run(&mut self, event_info: &EventInfo, requested: &[CheckId]) -> Result<AnalysisResult> {
        self.run_impl(event_info, requested).await.map(|(result, _journal)| result)
    }

    /// Does the actual work of [`Self::run`], also handing back the journal
    /// so [`test_support::run_with_journal`] can inspect every entry written.
    async fn run_impl(&mut self, event_info: &EventInfo, requested: &[CheckId]) -> Result<(AnalysisResult, OutputJournal)> {
        let started = Instant::now();
        let graph = Graph::build(&self.config.checks, requested)?;
        self.validate_static_goto_targets(&graph)?;

        let journal = OutputJournal::new();
        let mut stats = StatsManager::new();
        let mut routing_eval = RoutingEvaluator::new();
        let mut on_finish_tracker = OnFinishTracker::new();
        let mut fan_outs: HashMap<(CheckId, Scope), ForEachFanOut> = HashMap::new();
        let mut aggregated: HashSet<(CheckId, Scope, CheckId)> = HashSet::new();
        let mut pending_reattempts: Vec<PendingRunReattempt> = Vec::new();
        let mut event_overrides: HashMap<(CheckId, Scope), String> = HashMap::new();

        let mut queue: VecDeque<Vec<QueueItem>> = graph
            .waves
            .iter()
            .map(|level| level.iter().map(|id| QueueItem::Auto(id.clone())).collect())
            .collect();

        let mut checks_executed: Vec<CheckId> = Vec::new();
        let mut wave = 0u32;
        let mut stop_reason: Option<String> = None;

        'waves: while let Some(level_items) = queue.pop_front() {
            if wave >= self.config.max_waves {
                stop_reason = Some("wave cap exceeded".to_string());
                break;
            }

            let mut dispatch_list: Vec<(CheckId, Scope)> = Vec::new();
            for item in &level_items {
                match item {
                    QueueItem::Auto(id) => {
                        for scope in self.resolve_auto(&journal, id) {
                            dispatch_list.push((id.clone(), scope));
                        }
                    }
                    QueueItem::At(id, scope) => dispatch_list.push((id.clone(), scope.clone())),
                }
            }
            if dispatch_list.is_empty() {
                continue;
            }

            self.events.emit(EngineEvent::WaveStarted {
                wave,
                level: wave as usize,
                checks: dispatch_list.iter().map(|(id, _)| id.clone()).collect(),
            });

            let snapshot = journal.snapshot();
            let results = self
                .dispatch_level(&journal, &graph, &dispatch_list, snapshot, event_info, wave, &mut event_overrides)
                .await;

            for (check_id, scope, result, duration_ms) in &results {
                checks_executed.push(check_id.clone());
                stats.record(check_id, result, *duration_ms);
                self.events.emit(if result.skipped {
                    EngineEvent::CheckSkipped {
                        check_id: check_id.clone(),
                        scope: scope.to_string(),
                        dependency_failed: result.is_dependency_failure(),
                    }
                } else {
                    EngineEvent::CheckCompleted {
                        check_id: check_id.clone(),
                        scope: scope.to_string(),
                        fatal: result.has_fatal_issue(),
                    }
                });
            }

            let fail_fast_pairs: Vec<(CheckId, CheckResult)> =
                results.iter().map(|(id, _, r, _)| (id.clone(), r.clone())).collect();
            if self.config.fail_fast && StatsManager::fail_fast(&fail_fast_pairs) {
                stop_reason = Some("fail_fast".to_string());
                break 'waves;
            }

            let mut next_wave: Vec<(CheckId, Scope)> = Vec::new();

            // Structural forEach fan-out (spec §4.5), independent of routing.
            for (check_id, scope, result, _) in &results {
                let def = &self.config.checks[check_id];
                if !def.for_each || result.skipped || result.has_fatal_issue() {
                    continue;
                }
                let output = result.output.clone().unwrap_or(serde_json::Value::Null);
                match ForEachProcessor::iteration_items(&output) {
                    Ok(items) => {
                        let count = items.len();
                        let scopes = ForEachProcessor::child_scopes(check_id, scope, count);
                        let dependents: Vec<CheckId> = graph
                            .nodes
                            .get(check_id)
                            .map(|n| n.dependents.clone())
                            .unwrap_or_default();
                        fan_outs.insert(
                            (check_id.clone(), scope.clone()),
                            ForEachFanOut {
                                dependents: dependents.iter().cloned().collect(),
                                len: count,
                            },
                        );
                        // The parent's own unwrapped per-iteration value, so
                        // dependents resolve a single item (not the whole
                        // list) at their own scope via ordinary prefix
                        // lookup (spec §4.5).
                        for (i, child_scope) in scopes.iter().enumerate() {
                            journal.append(
                                check_id.clone(),
                                child_scope.clone(),
                                wave,
                                CheckResult {
                                    output: Some(items[i].clone()),
                                    ..Default::default()
                                },
                            );
                        }
                        for dep in &dependents {
                            for (i, child_scope) in scopes.iter().enumerate() {
                                self.write_zip_entries(&journal, &graph, dep, check_id, scope, child_scope, i, wave);
                            }
                        }
                    }
                    Err(_) => {
                        tracing::warn!(check_id, "forEach output was not a list; fan-out skipped");
                    }
                }
            }

            // RoutingApply.
            for (check_id, scope, result, _) in &results {
                if result.skipped {
                    continue;
                }
                let def = self.config.checks[check_id].clone();
                let block = if result.has_fatal_issue() { &def.on_fail } else { &def.on_success };
                if !block.is_empty() {
                    self.apply_routing(
                        &journal,
                        &graph,
                        &mut routing_eval,
                        check_id,
                        scope,
                        block,
                        event_info,
                        wave,
                        &mut queue,
                        &mut next_wave,
                        &mut pending_reattempts,
                        &mut event_overrides,
                    )
                    .await;
                }
            }

            // forEach aggregation: once every iteration scope has a result
            // for one of a parent's immediate dependents, roll it up into a
            // single aggregate entry at the parent's own scope, readable by
            // checks outside the fan-out (spec §4.5).
            for (key, fan_out) in &fan_outs {
                let (parent_id, parent_scope) = key;
                for dep in &fan_out.dependents {
                    let agg_key = (parent_id.clone(), parent_scope.clone(), dep.clone());
                    if aggregated.contains(&agg_key) {
                        continue;
                    }
                    let mut per_iteration = Vec::with_capacity(fan_out.len);
                    let mut all_present = true;
                    for i in 0..fan_out.len {
                        let child_scope = parent_scope.child(parent_id.as_str(), i);
                        let view = journal.view(journal.snapshot(), child_scope);
                        match view.get(dep) {
                            // An if-skipped iteration has decided (the
                            // fan-out isn't still waiting on it) but
                            // contributes nothing to the aggregate array.
                            Some(r) if r.skipped => {}
                            Some(r) => per_iteration.push(r),
                            None => {
                                all_present = false;
                                break;
                            }
                        }
                    }
                    if all_present {
                        let aggregate = ForEachProcessor::aggregate(&per_iteration);
                        journal.append(dep.clone(), parent_scope.clone(), wave, aggregate);
                        aggregated.insert(agg_key);
                    }
                }
            }

            // on_finish: forEach parents whose immediate dependents have all
            // been aggregated (every iteration complete), fired at most once.
            let finished_parents: Vec<(CheckId, Scope)> = fan_outs
                .iter()
                .filter(|(key, fan_out)| {
                    fan_out
                        .dependents
                        .iter()
                        .all(|dep| aggregated.contains(&(key.0.clone(), key.1.clone(), dep.clone())))
                })
                .map(|(key, _)| key.clone())
                .collect();

            for (parent_id, parent_scope) in finished_parents {
                let should_fire = on_finish_tracker.should_fire(&parent_id, &parent_scope, true);
                if !should_fire {
                    continue;
                }
                let def = self.config.checks[&parent_id].clone();
                if def.on_finish.is_empty() {
                    continue;
                }
                self.apply_routing(
                    &journal,
                    &graph,
                    &mut routing_eval,
                    &parent_id,
                    &parent_scope,
                    &def.on_finish,
                    event_info,
                    wave,
                    &mut queue,
                    &mut next_wave,
                    &mut pending_reattempts,
                    &mut event_overrides,
                )
                .await;
            }

            // Release any pending run-triggered re-attempts whose triggers settled.
            let mut still_pending = Vec::new();
            for pending in pending_reattempts.drain(..) {
                let resolved: Vec<Option<CheckResult>> = pending
                    .trigger
                    .iter()
                    .map(|(id, scope)| journal.view(journal.snapshot(), scope.clone()).get(id))
                    .collect();
                if resolved.iter().all(Option::is_some) {
                    if resolved.iter().all(|r| !r.as_ref().unwrap().has_fatal_issue()) {
                        next_wave.push(pending.reattempt.clone());
                    }
                } else {
                    still_pending.push(pending);
                }
            }
            pending_reattempts = still_pending;

            wave += 1;
            if !next_wave.is_empty() {
                let mut seen = HashSet::new();
                let deduped: Vec<QueueItem> = next_wave
                    .into_iter()
                    .filter(|item| seen.insert(item.clone()))
                    .map(|(id, scope)| QueueItem::At(id, scope))
                    .collect();
                queue.push_back(deduped);
            }
        }

        let final_issues: Vec<crate::types::Issue> = {
            let view = journal.view(journal.snapshot(), Scope::root());
            checks_executed
                .iter()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter_map(|id| view.get(id))
                .flat_map(|r| r.issues)
                .collect()
        };

        if let Some(reason) = &stop_reason {
            self.events.emit(EngineEvent::Stopped { reason: reason.clone() });
        } else {
            self.events.emit(EngineEvent::Completed {
                checks_executed: checks_executed.len(),
            });
        }

        let result = AnalysisResult {
            checks_executed,
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
            review_summary: ReviewSummary { issues: final_issues },
            stats: stats.snapshot(),
            journal: JournalSummary {
                entry_count: journal.entry_count(),
                checks_with_output: journal.checks_with_output(),
            },
        };
        Ok((result, journal))
    }

    /// Goto targets given as a literal `goto` id (not `gotoExpr`) are
    /// validated up front; this is the one routing misconfiguration the
    /// engine can catch statically (spec §4.4 "Ancestor-only rule").
    /// Only a block whose `goto` is guaranteed to fire — no `run`/`runExpr`
    /// ahead of it in the priority order — is checked here; a `goto` that
    /// `run` can pre-empt is validated (and, if invalid, ignored) at the
    /// point it's actually chosen, in [`Self::apply_routing`].
    fn validate_static_goto_targets(&self, graph: &Graph) -> Result<()> {
        for (id, def) in &self.config.checks {
            if !graph.nodes.contains_key(id) {
                continue;
            }
            for block in [&def.on_fail, &def.on_success, &def.on_finish] {
                if block.run.is_empty() && block.run_expr.is_none() {
                    if let Some(target) = &block.goto {
                        if !graph.is_ancestor(target, id) {
                            return Err(EngineError::NonAncestorGoto {
                                from: id.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The scope set a plain DAG-propagated (non-routing-triggered) check
    /// executes at: the union of its dependencies' leaf scopes, or root for
    /// a check with no dependencies. This is how forEach fan-out reaches
    /// transitive dependents without the engine re-enqueuing them
    /// explicitly (spec §4.5).
    fn resolve_auto(&self, journal: &OutputJournal, id: &str) -> Vec<Scope> {
        let def = &self.config.checks[id];
        if def.depends_on.is_empty() {
            return vec![Scope::root()];
        }
        // No root fallback here: by wave order every dependency has already
        // produced at least one leaf scope, unless it's a forEach parent
        // that fanned out zero iterations — in which case this check
        // correctly has nothing to run against this wave.
        let mut scopes = Vec::new();
        let mut seen = HashSet::new();
        for dep in &def.depends_on {
            let dep_for_each = self.config.checks.get(dep).map(|d| d.for_each).unwrap_or(false);
            for s in journal.leaf_scopes(dep) {
                // A forEach dependency's own (un-fanned) scope never counts
                // towards a plain dependent's scope set — only its genuine
                // per-iteration children do. This is what makes zero
                // iterations propagate as zero downstream executions rather
                // than one execution against the whole list.
                if dep_for_each {
                    let is_iteration_child = s.0.last().map(|seg| &seg.check_id == dep).unwrap_or(false);
                    if !is_iteration_child {
                        continue;
                    }
                }
                if seen.insert(s.clone()) {
                    scopes.push(s);
                }
            }
        }
        // Collapse the union to its leaves: a dependent with both a plain
        // dependency (contributing the root scope) and a forEach dependency
        // (contributing per-iteration child scopes) must run only at the
        // iteration scopes — the root scope is a strict prefix of each of
        // them and would otherwise dispatch the check an extra time, at the
        // same scope the forEach aggregation later rolls the iterations up
        // into.
        let all = scopes.clone();
        scopes.retain(|s| !all.iter().any(|other| other != s && s.is_prefix_of(other)));
        scopes.sort();
        scopes
    }

    /// Writes, at `child_scope`, every other forEach ancestor's own
    /// `index`-th iteration result so a dependent zipped against two or more
    /// forEach parents resolves each through ordinary prefix lookup
    /// (DESIGN.md Open Question decision 1).
    #[allow(clippy::too_many_arguments)]
    fn write_zip_entries(
        &self,
        journal: &OutputJournal,
        graph: &Graph,
        dependent_id: &str,
        owning_parent: &str,
        owning_parent_scope: &Scope,
        child_scope: &Scope,
        index: usize,
        wave: u32,
    ) {
        for other in graph.all_ancestors(dependent_id) {
            if other == owning_parent {
                continue;
            }
            let Some(def) = self.config.checks.get(&other) else { continue };
            if !def.for_each {
                continue;
            }
            let other_scope = owning_parent_scope.child(other.as_str(), index);
            let view = journal.view(journal.snapshot(), other_scope);
            let entry = view.get(&other).unwrap_or_default();
            let zipped = ForEachProcessor::zipped_entry(std::slice::from_ref(&entry), 0);
            journal.append(other.clone(), child_scope.clone(), wave, zipped);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_routing(
        &self,
        journal: &OutputJournal,
        graph: &Graph,
        routing_eval: &mut RoutingEvaluator,
        check_id: &str,
        scope: &Scope,
        block: &RoutingBlock,
        event_info: &EventInfo,
        wave: u32,
        queue: &mut VecDeque<Vec<QueueItem>>,
        next_wave: &mut Vec<(CheckId, Scope)>,
        pending_reattempts: &mut Vec<PendingRunReattempt>,
        event_overrides: &mut HashMap<(CheckId, Scope), String>,
    ) {
        let snapshot = journal.snapshot();
        let view = journal.view(snapshot, scope.clone());
        let visible: Vec<CheckId> = graph
            .nodes
            .get(check_id)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();

        let run_expr_ids = if let Some(expr) = &block.run_expr {
            evaluate_string_list(
                expr,
                EvalContext {
                    outputs: &view,
                    event: event_info,
                    env: &self.config.env,
                    visible_checks: &visible,
                },
            )
            .await
        } else {
            Vec::new()
        };
        let goto_expr_target = if let Some(expr) = &block.goto_expr {
            evaluate_string(
                expr,
                EvalContext {
                    outputs: &view,
                    event: event_info,
                    env: &self.config.env,
                    visible_checks: &visible,
                },
            )
            .await
        } else {
            None
        };
        let resolved = ResolvedRouting::resolve(block, run_expr_ids, goto_expr_target);

        let max_loops = self.config.routing.max_loops;
        let reattempt_after_run = !resolved.run_ids.is_empty() && block.retry.is_none();
        let outcome = routing_eval.decide(check_id, scope, block, &resolved, max_loops, reattempt_after_run);

        self.events.emit(EngineEvent::RoutingTransition {
            check_id: check_id.to_string(),
            scope: scope.to_string(),
            outcome: format!("{outcome:?}"),
        });

        match outcome {
            RoutingOutcome::Retry { delay } => {
                tokio::time::sleep(delay).await;
                next_wave.push((check_id.to_string(), scope.clone()));
            }
            RoutingOutcome::Run { ids, reattempt_source } => {
                let triggers: Vec<(CheckId, Scope)> = ids.iter().map(|id| (id.clone(), scope.clone())).collect();
                next_wave.extend(triggers.iter().cloned());
                if reattempt_source {
                    pending_reattempts.push(PendingRunReattempt {
                        trigger: triggers,
                        reattempt: (check_id.to_string(), scope.clone()),
                    });
                }
            }
            RoutingOutcome::Goto { target, event_override } => {
                if !graph.is_ancestor(&target, check_id) {
                    tracing::warn!(check_id, target = target.as_str(), "goto target is not an ancestor; ignoring");
                    return;
                }
                for wave_items in build_goto_waves(graph, &target, check_id, scope) {
                    let items: Vec<QueueItem> = wave_items.into_iter().map(|(id, s)| QueueItem::At(id, s)).collect();
                    queue.push_back(items);
                }
                queue.push_back(vec![QueueItem::At(check_id.to_string(), scope.clone())]);
                if let Some(ov) = event_override {
                    let mapped = map_event_name(&ov);
                    event_overrides.insert((target, scope.clone()), mapped.clone());
                    event_overrides.insert((check_id.to_string(), scope.clone()), mapped);
                }
            }
            RoutingOutcome::LoopBudgetExceeded => {
                journal.append(
                    check_id.to_string(),
                    scope.clone(),
                    wave,
                    CheckResult {
                        issues: vec![crate::types::Issue::fatal("routing/loop_budget", "loop budget exceeded")],
                        error: Some(crate::types::ErrorKind::LoopBudgetExceeded),
                        ..Default::default()
                    },
                );
            }
            RoutingOutcome::None => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_level(
        &self,
        journal: &OutputJournal,
        graph: &Graph,
        items: &[(CheckId, Scope)],
        snapshot: Snapshot,
        event_info: &EventInfo,
        wave: u32,
        event_overrides: &mut HashMap<(CheckId, Scope), String>,
    ) -> Vec<(CheckId, Scope, CheckResult, u64)> {
        let mut groups: HashMap<String, Vec<(CheckId, Scope)>> = HashMap::new();
        let mut units: Vec<DispatchUnit> = Vec::new();
        for (id, scope) in items {
            match self.config.checks.get(id).and_then(|d| d.session_provider.clone()) {
                Some(session) => groups.entry(session).or_default().push((id.clone(), scope.clone())),
                None => units.push(DispatchUnit::Single((id.clone(), scope.clone()))),
            }
        }
        for (_, group) in groups {
            units.push(DispatchUnit::SessionGroup(group));
        }

        let overrides = event_overrides.clone();
        let tasks = units.into_iter().map(|unit| {
            let overrides = overrides.clone();
            async move {
                match unit {
                    DispatchUnit::Single(item) => vec![self.execute_one(journal, graph, item, snapshot, event_info, wave, &overrides).await],
                    DispatchUnit::SessionGroup(group) => {
                        let mut out = Vec::with_capacity(group.len());
                        for item in group {
                            out.push(self.execute_one(journal, graph, item, snapshot, event_info, wave, &overrides).await);
                        }
                        out
                    }
                }
            }
        });

        let results: Vec<Vec<(CheckId, Scope, CheckResult, u64)>> =
            futures::stream::iter(tasks).buffer_unordered(self.config.max_parallelism.max(1)).collect().await;

        for (id, scope) in items {
            event_overrides.remove(&(id.clone(), scope.clone()));
        }

        results.into_iter().flatten().collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_one(
        &self,
        journal: &OutputJournal,
        graph: &Graph,
        (check_id, scope): (CheckId, Scope),
        snapshot: Snapshot,
        event_info: &EventInfo,
        wave: u32,
        event_overrides: &HashMap<(CheckId, Scope), String>,
    ) -> (CheckId, Scope, CheckResult, u64) {
        let started = Instant::now();
        self.events.emit(EngineEvent::CheckDispatched {
            check_id: check_id.clone(),
            scope: scope.to_string(),
        });

        let def: CheckDefinition = match self.config.checks.get(&check_id) {
            Some(d) => d.clone(),
            None => {
                let result = CheckResult {
                    issues: vec![crate::types::Issue::fatal("graph/error", "check not defined")],
                    ..Default::default()
                };
                journal.append(check_id.clone(), scope.clone(), wave, result.clone());
                return (check_id, scope, result, started.elapsed().as_millis() as u64);
            }
        };

        if let Some(expr) = &def.if_expr {
            let view = journal.view(snapshot, scope.clone());
            let outcome = evaluate_bool(
                expr,
                EvalContext {
                    outputs: &view,
                    event: event_info,
                    env: &self.config.env,
                    visible_checks: &def.depends_on,
                },
            )
            .await;
            if !outcome.as_bool() {
                let result = CheckResult {
                    skipped: true,
                    ..Default::default()
                };
                journal.append(check_id.clone(), scope.clone(), wave, result.clone());
                return (check_id, scope, result, started.elapsed().as_millis() as u64);
            }
        }

        let (gate_outcome, view) = DependencyGate::build(journal, graph, &check_id, &scope, snapshot);
        let deps = match gate_outcome {
            GateOutcome::Skip => {
                let result = CheckResult::skipped_dependency_failed();
                journal.append(check_id.clone(), scope.clone(), wave, result.clone());
                return (check_id, scope, result, started.elapsed().as_millis() as u64);
            }
            GateOutcome::Ready(deps) => deps,
        };

        let Some(provider) = self.providers.get(&def.check_type) else {
            let result = CheckResult {
                issues: vec![crate::types::Issue::fatal("provider_registry/error", format!("no provider registered for type '{}'", def.check_type))],
                ..Default::default()
            };
            journal.append(check_id.clone(), scope.clone(), wave, result.clone());
            return (check_id, scope, result, started.elapsed().as_millis() as u64);
        };

        let timeout = Duration::from_millis(def.timeout_ms.unwrap_or(self.config.default_timeout_ms));
        let event_for_check = match event_overrides.get(&(check_id.clone(), scope.clone())) {
            Some(name) => EventInfo {
                event_name: name.clone(),
                ..event_info.clone()
            },
            None => event_info.clone(),
        };
        let exec_ctx = ExecContext {
            timeout,
            journal: &view,
            cli_message: None,
        };

        let mut result = match tokio::time::timeout(timeout, provider.execute(&def, &event_for_check, &deps, &exec_ctx)).await {
            Ok(result) => result,
            Err(_) => CheckResult {
                issues: vec![crate::types::Issue::fatal(format!("{}/timeout", def.check_type), "provider invocation timed out")],
                error: Some(crate::types::ErrorKind::Timeout),
                ..Default::default()
            },
        };
        // A forEach parent's own raw output is the whole list, not a single
        // iteration's value — mark it aggregate so ordinary (non-`-raw`)
        // reads skip straight to the per-iteration entries fanned out below,
        // and so a parent with zero iterations yields zero leaf scopes
        // instead of looking like a single plain result at its own scope.
        if def.for_each && !result.skipped && !result.has_fatal_issue() {
            result.is_for_each = true;
        }

        journal.append(check_id.clone(), scope.clone(), wave, result.clone());
        (check_id, scope, result, started.elapsed().as_millis() as u64)
    }
}

/// Test-only entry point exposing the journal a run produced, for asserting
/// invariants `AnalysisResult` alone doesn't surface (e.g. at-most-once per
/// wave per scope); never used by production callers.
pub mod test_support {
    use super::*;
    use crate::journal::JournalEntry;

    /// Runs `engine` exactly like [`Engine::run`], additionally returning
    /// every entry the journal recorded.
    pub async fn run_with_journal(
        engine: &mut Engine,
        event_info: &EventInfo,
        requested: &[CheckId],
    ) -> Result<(AnalysisResult, Vec<JournalEntry>)> {
        let (result, journal) = engine.run_impl(event_info, requested).await?;
        Ok((result, journal.all_entries()))
    }
}

/// Maps a `goto_event` override to the effective event name (spec §4.4.4):
/// any `pr_*` collapses to `pull_request`; other overrides pass through
/// literally.
fn map_event_name(override_name: &str) -> String {
    if override_name.starts_with("pr_") {
        "pull_request".to_string()
    } else {
        override_name.to_string()
    }
}

/// The sub-waves a `goto` replays: every existing topological level between
/// `target`'s level and `source`'s level, restricted to checks that are both
/// reachable forward from `target` and backward from `source` (spec §4.4.3:
/// "ancestors between target and the source check... remain visible" means
/// only the path between them re-executes, not the whole subgraph).
fn build_goto_waves(graph: &Graph, target: &str, source: &str, scope: &Scope) -> Vec<Vec<(CheckId, Scope)>> {
    let Some(target_level) = graph.level_of(target) else { return Vec::new() };
    let Some(source_level) = graph.level_of(source) else { return Vec::new() };
    if target_level > source_level {
        return Vec::new();
    }

    let mut forward_from_target = HashSet::new();
    let mut stack = vec![target.to_string()];
    while let Some(id) = stack.pop() {
        if forward_from_target.insert(id.clone()) {
            if let Some(n) = graph.nodes.get(&id) {
                stack.extend(n.dependents.clone());
            }
        }
    }

    let mut ancestors_of_source = graph.all_ancestors(source);
    ancestors_of_source.insert(source.to_string());

    let path: HashSet<&CheckId> = forward_from_target.intersection(&ancestors_of_source).collect();

    let mut waves = Vec::new();
    for level in &graph.waves[target_level..=source_level.min(graph.waves.len().saturating_sub(1))] {
        let items: Vec<(CheckId, Scope)> = level
            .iter()
            .filter(|id| path.contains(id) && *id != source)
            .map(|id| (id.clone(), scope.clone()))
            .collect();
        if !items.is_empty() {
            waves.push(items);
        }
    }
    waves
}

use futures::StreamExt;
