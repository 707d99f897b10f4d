//! Shared records used across the engine: scopes, issues, check results, and
//! the analysis result returned to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a check, as declared in `EngineConfig::checks`.
pub type CheckId = String;

/// One step of a [`Scope`] path: the forEach parent and the index of the
/// iteration it produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeSegment {
    pub check_id: CheckId,
    pub index: usize,
}

/// A path through forEach iterations identifying where in the fan-out tree a
/// value was produced or consumed. The empty scope is the root; scopes form
/// a prefix-closed tree (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope(pub Vec<ScopeSegment>);

impl Scope {
    pub fn root() -> Self {
        Scope(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends one fan-out step, returning the child scope.
    pub fn child(&self, check_id: impl Into<CheckId>, index: usize) -> Scope {
        let mut segments = self.0.clone();
        segments.push(ScopeSegment {
            check_id: check_id.into(),
            index,
        });
        Scope(segments)
    }

    /// True if `self` is a prefix of `other` (including equality).
    pub fn is_prefix_of(&self, other: &Scope) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Length of the longest common prefix with `other`.
    pub fn common_prefix_len(&self, other: &Scope) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    pub fn prefix(&self, len: usize) -> Scope {
        Scope(self.0[..len.min(self.0.len())].to_vec())
    }

    pub fn parent(&self) -> Option<Scope> {
        if self.0.is_empty() {
            None
        } else {
            Some(Scope(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}#{}", seg.check_id, seg.index)?;
        }
        write!(f, "]")
    }
}

/// Severity of an [`Issue`]. `Error` and `Critical` are both treated as
/// fatal for routing purposes; the distinction is reporting-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single finding produced by a check. Fatal issues (rule ids ending in
/// `/error`, `/execution_error`, or `_fail_if`) drive routing and dependency
/// propagation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: String,
    pub rule_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Issue {
    pub fn fatal(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Issue {
            severity: Severity::Error,
            category: "engine".to_string(),
            rule_id: rule_id.into(),
            message: message.into(),
            file: None,
            line: None,
        }
    }

    /// A rule id is fatal if it ends in `/error`, `/execution_error`, or `_fail_if`.
    pub fn rule_is_fatal(rule_id: &str) -> bool {
        rule_id.ends_with("/error") || rule_id.ends_with("/execution_error") || rule_id.ends_with("_fail_if")
    }

    pub fn is_fatal(&self) -> bool {
        Self::rule_is_fatal(&self.rule_id)
    }
}

/// Outcome of a provider invocation, or of the engine skipping/aggregating a
/// check (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub is_for_each: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl CheckResult {
    pub fn has_fatal_issue(&self) -> bool {
        self.issues.iter().any(Issue::is_fatal)
    }

    /// True only for a skip that should itself cascade to dependents — not
    /// an ordinary `if`-gated skip, which simply yields no output.
    pub fn is_dependency_failure(&self) -> bool {
        self.skipped && self.error == Some(ErrorKind::DependencyFailed)
    }

    pub fn skipped_dependency_failed() -> Self {
        CheckResult {
            skipped: true,
            error: Some(ErrorKind::DependencyFailed),
            ..Default::default()
        }
    }
}

/// Coarse classification of why a `CheckResult` carries a fatal issue,
/// independent of the free-form `rule_id` string. Used by callers that want
/// to branch without string-matching rule ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DependencyFailed,
    Timeout,
    ExecutionError,
    LoopBudgetExceeded,
    ConditionError,
}

/// Per-check counters tracked by [`crate::stats::StatsManager`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckStats {
    pub check_id: CheckId,
    pub total_runs: u64,
    pub success_runs: u64,
    pub failures: u64,
    pub skipped: u64,
    pub duration_ms: u64,
    pub fatal: bool,
}

/// Summary of the journal returned alongside the analysis result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalSummary {
    pub entry_count: usize,
    pub checks_with_output: Vec<CheckId>,
}

/// The structured result returned by [`crate::Engine::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub checks_executed: Vec<CheckId>,
    pub execution_time_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub review_summary: ReviewSummary,
    pub stats: Vec<CheckStats>,
    pub journal: JournalSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub issues: Vec<Issue>,
}
