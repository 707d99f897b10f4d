//! Observable state-transition events: `tracing` plus an optional in-process
//! channel a caller can subscribe to (spec §6, SPEC_FULL.md §2).

use crate::types::CheckId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One engine state-machine transition (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EngineEvent {
    /// `WavePlanning` produced a new wave to dispatch.
    WaveStarted { wave: u32, level: usize, checks: Vec<CheckId> },
    /// A check was handed to its provider.
    CheckDispatched { check_id: CheckId, scope: String },
    /// A check finished; `fatal` reflects whether it carried a fatal issue.
    CheckCompleted { check_id: CheckId, scope: String, fatal: bool },
    /// A check was skipped, either because an `if` condition was false or
    /// because a dependency failed (`dependency_failed` distinguishes them).
    CheckSkipped {
        check_id: CheckId,
        scope: String,
        dependency_failed: bool,
    },
    /// `RoutingApply` decided a retry/run/goto for a completed check.
    RoutingTransition { check_id: CheckId, scope: String, outcome: String },
    /// The run reached `Completed`.
    Completed { checks_executed: usize },
    /// The run reached `Stopped` (wave cap or unrecoverable config error).
    Stopped { reason: String },
}

/// Receiving half of an event subscription.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Emits [`EngineEvent`]s to `tracing` and, if a subscriber was attached via
/// [`EventSink::subscribe`], to an unbounded channel. A full/dropped receiver
/// never blocks or fails the run — events are best-effort (spec §6: the
/// event stream is observability, not a control path).
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a receiver; replaces any previously attached one.
    pub fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    pub fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::WaveStarted { wave, level, checks } => {
                tracing::info!(wave, level, checks = ?checks, "wave started");
            }
            EngineEvent::CheckDispatched { check_id, scope } => {
                tracing::debug!(check_id, scope, "check dispatched");
            }
            EngineEvent::CheckCompleted { check_id, scope, fatal } => {
                tracing::debug!(check_id, scope, fatal, "check completed");
            }
            EngineEvent::CheckSkipped {
                check_id,
                scope,
                dependency_failed,
            } => {
                if *dependency_failed {
                    tracing::debug!(check_id, scope, "check skipped: dependency failed");
                } else {
                    tracing::debug!(check_id, scope, "check skipped: condition not met");
                }
            }
            EngineEvent::RoutingTransition { check_id, scope, outcome } => {
                tracing::info!(check_id, scope, outcome, "routing transition");
            }
            EngineEvent::Completed { checks_executed } => {
                tracing::info!(checks_executed, "run completed");
            }
            EngineEvent::Stopped { reason } => {
                tracing::warn!(reason, "run stopped early");
            }
        }

        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
