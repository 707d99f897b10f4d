//! Error taxonomy for the check execution engine.
//!
//! Configuration errors (`graph/*`, `routing/non_ancestor_goto`) abort a run
//! before any check executes. Everything else — scheduling and execution
//! failures — never propagates out of [`crate::Engine::run`]; it is instead
//! reflected as a fatal [`crate::Issue`] on the affected check's
//! [`crate::CheckResult`], per spec §7.

use crate::types::CheckId;

/// Errors that can abort a run during initialization.
///
/// These are the only errors `Engine::run` returns as an `Err` — every other
/// failure mode (timeouts, provider errors, loop budget, routing) is carried
/// inside the returned `AnalysisResult` as a fatal `Issue`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A `dependsOn` entry refers to a check id that isn't defined.
    #[error("check '{check}' depends on unknown check '{dependency}'")]
    UnknownDependency { check: CheckId, dependency: CheckId },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected among checks: {0:?}")]
    Cycle(Vec<CheckId>),

    /// A `goto` target is not an ancestor of its source check.
    #[error("routing goto from '{from}' to '{target}' is not ancestor-only")]
    NonAncestorGoto { from: CheckId, target: CheckId },

    /// A requested check id was not defined in the config.
    #[error("requested check '{0}' is not defined")]
    UnknownCheck(CheckId),
}

pub type Result<T> = std::result::Result<T, EngineError>;
