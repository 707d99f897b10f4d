//! A dependency-aware, wave-based check execution engine.
//!
//! Checks are declared as a DAG (`dependsOn`); [`Engine::run`] resolves them
//! into topological waves, dispatches each wave's checks through a
//! caller-supplied [`Provider`] registry, and applies the `onSuccess`/
//! `onFail`/`onFinish` routing blocks (retry, run, goto) between waves.
//! `forEach` checks fan out their dependents across scoped iterations and
//! re-aggregate once every iteration completes.
//!
//! Provider implementations, configuration parsing, CLI surfaces, and
//! reporting/telemetry are intentionally out of scope — this crate is the
//! scheduling and routing core other layers build on.

mod condition;
mod config;
mod engine;
mod error;
mod events;
mod foreach;
mod gate;
mod graph;
mod journal;
mod provider;
mod routing;
mod stats;
mod types;

pub use condition::{evaluate_bool, evaluate_string, evaluate_string_list, EvalContext, EvalOutcome};
pub use config::{
    Backoff, BackoffMode, CheckDefinition, EngineConfig, EventInfo, RetrySpec, RoutingBlock, RoutingConfig,
    RoutingDefaults,
};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventReceiver};
pub use foreach::{ForEachProcessor, NotAList, OnFinishTracker};
pub use gate::{DependencyGate, GateOutcome};
pub use graph::{Graph, NodeEdges};
pub use journal::{ContextView, JournalEntry, OutputJournal, Snapshot};
pub use provider::{ExecContext, Provider, ProviderRegistry};
pub use routing::{ResolvedRouting, RoutingEvaluator, RoutingOutcome};
pub use stats::StatsManager;
pub use types::{
    AnalysisResult, CheckId, CheckResult, CheckStats, ErrorKind, Issue, JournalSummary, ReviewSummary, Scope,
    ScopeSegment, Severity,
};

/// Test-only helpers shared between this crate's own tests and the
/// integration tests under `tests/`; never used by production callers.
pub mod test_support {
    pub use crate::engine::test_support::*;
    pub use crate::provider::test_support::*;
}
