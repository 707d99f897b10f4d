//! Configuration types consumed by the engine.
//!
//! The engine treats configuration as already validated (spec §6) — no
//! schema validation happens here. These types exist so the engine has a
//! concrete `Deserialize`able shape to operate on; parsing a config file into
//! `EngineConfig` is a caller concern.

use crate::types::CheckId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Backoff strategy for a `retry` routing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    pub mode: BackoffMode,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    pub max: u32,
    pub backoff: Backoff,
}

/// `onFail` / `onSuccess` / `onFinish` routing block (spec §3, §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<CheckId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto: Option<CheckId>,
    /// Optional expression evaluating to a `string[]` of check ids, merged
    /// with `run` (deduplicated, first occurrence wins).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_expr: Option<String>,
    /// Optional expression evaluating to a check id, used if `goto` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto_expr: Option<String>,
    /// Per-jump event name override applied only for the inline goto target
    /// and its immediate re-run (spec §4.4.4).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto_event: Option<String>,
}

impl RoutingBlock {
    pub fn is_empty(&self) -> bool {
        self.retry.is_none()
            && self.run.is_empty()
            && self.goto.is_none()
            && self.run_expr.is_none()
            && self.goto_expr.is_none()
    }
}

/// A named unit of work, as declared in configuration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: CheckId,
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(default)]
    pub depends_on: Vec<CheckId>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    #[serde(default)]
    pub for_each: bool,
    #[serde(default)]
    pub on_fail: RoutingBlock,
    #[serde(default)]
    pub on_success: RoutingBlock,
    #[serde(default)]
    pub on_finish: RoutingBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_provider: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Per-check timeout override (spec SPEC_FULL.md §3.1); falls back to
    /// the run-level default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Provider-specific configuration, opaque to the engine.
    #[serde(default)]
    pub provider_config: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_loops: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
    #[serde(default)]
    pub defaults: RoutingDefaults,
}

fn default_max_loops() -> u32 {
    10
}

impl Default for RetrySpec {
    fn default() -> Self {
        RetrySpec {
            max: 0,
            backoff: Backoff {
                mode: BackoffMode::Fixed,
                delay_ms: 0,
            },
        }
    }
}

/// Top-level engine configuration (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub version: String,
    pub checks: HashMap<CheckId, CheckDefinition>,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Global wave cap — a second-line guard against runaway routing
    /// (spec §5, "A global wave cap (configurable) bounds total waves").
    #[serde(default = "default_wave_cap")]
    pub max_waves: u32,
    /// Run-level default a check's `timeoutMs` falls back to when absent
    /// (SPEC_FULL.md §3.1).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_max_parallelism() -> usize {
    4
}

fn default_wave_cap() -> u32 {
    1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl EngineConfig {
    pub fn new(version: impl Into<String>) -> Self {
        EngineConfig {
            version: version.into(),
            checks: HashMap::new(),
            max_parallelism: default_max_parallelism(),
            fail_fast: false,
            routing: RoutingConfig {
                max_loops: default_max_loops(),
                defaults: RoutingDefaults::default(),
            },
            env: HashMap::new(),
            max_waves: default_wave_cap(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Opaque event/PR input passed to every provider; the engine only reads
/// `event_name` and `files_changed` (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventInfo {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub extra: Value,
}
