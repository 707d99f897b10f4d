//! The engine's only outbound dependency: the provider capability (spec §6).
//!
//! Provider implementations (ai, command, http, mcp, memory, script, log,
//! human-input, …) are explicitly out of scope (spec §1) — this module only
//! defines the trait contract and a registry the caller populates before
//! calling [`crate::Engine::run`].

use crate::config::{CheckDefinition, EventInfo};
use crate::journal::ContextView;
use crate::types::{CheckId, CheckResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Context passed to a provider invocation. Providers may read the journal
/// but never mutate engine state (spec §6).
pub struct ExecContext<'a> {
    pub timeout: Duration,
    pub journal: &'a ContextView,
    /// CLI message surfaced for `human-input`-style providers.
    pub cli_message: Option<&'a str>,
}

/// The capability every check type resolves to (spec §6).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn execute(
        &self,
        check: &CheckDefinition,
        event: &EventInfo,
        deps: &HashMap<CheckId, CheckResult>,
        ctx: &ExecContext<'_>,
    ) -> CheckResult;
}

/// Resolves a provider by `check.type` (spec §4.8).
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check_type: impl Into<String>, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(check_type.into(), provider);
        self
    }

    pub fn get(&self, check_type: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(check_type).cloned()
    }
}

/// Test-only providers used by this crate's own tests and available to
/// integration tests under `tests/`; never a real provider (spec §1).
pub mod test_support {
    use super::*;
    use crate::types::{Issue, Severity};
    use std::sync::Mutex;

    /// Scripted outcomes keyed by check id, consumed in call order; a check
    /// invoked more times than it has scripted outcomes repeats its last one.
    #[derive(Default)]
    pub struct MockProvider {
        scripts: Mutex<HashMap<CheckId, Vec<CheckResult>>>,
        pub calls: Mutex<Vec<CheckId>>,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, check_id: impl Into<CheckId>, outcomes: Vec<CheckResult>) {
            self.scripts.lock().unwrap().insert(check_id.into(), outcomes);
        }

        pub fn always_succeeds_with(value: serde_json::Value) -> CheckResult {
            CheckResult {
                output: Some(value),
                ..Default::default()
            }
        }

        pub fn fails_fatal(rule_id: &str) -> CheckResult {
            CheckResult {
                issues: vec![Issue {
                    severity: Severity::Error,
                    category: "test".to_string(),
                    rule_id: rule_id.to_string(),
                    message: "scripted failure".to_string(),
                    file: None,
                    line: None,
                }],
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn execute(
            &self,
            check: &CheckDefinition,
            _event: &EventInfo,
            _deps: &HashMap<CheckId, CheckResult>,
            _ctx: &ExecContext<'_>,
        ) -> CheckResult {
            self.calls.lock().unwrap().push(check.id.clone());
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&check.id) {
                Some(outcomes) if !outcomes.is_empty() => {
                    if outcomes.len() == 1 {
                        outcomes[0].clone()
                    } else {
                        outcomes.remove(0)
                    }
                }
                _ => CheckResult::default(),
            }
        }
    }
}
