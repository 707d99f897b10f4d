//! Append-only output journal and its scoped, snapshotted views (spec §4.2).
//!
//! The journal is the engine's only cross-task mutable structure. Writes are
//! appended under a briefly-held lock; reads take a [`Snapshot`] (an opaque
//! write-frontier marker) and resolve against an immutable prefix of the
//! entry log, so a reader's view is stable for the lifetime of one
//! evaluation even while other tasks keep appending (spec §4.2 rationale).

use crate::types::{CheckId, CheckResult, Scope};
use std::sync::{Arc, RwLock};

/// One append to the journal. Multiple entries may exist for the same
/// `(check_id, scope)` across waves; readers resolve to the latest by
/// `sequence` (spec §3).
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub check_id: CheckId,
    pub scope: Scope,
    pub value: CheckResult,
    pub wave_of_production: u32,
    pub sequence: u64,
}

#[derive(Default)]
struct Inner {
    entries: Vec<JournalEntry>,
}

/// An opaque write-frontier marker captured by [`OutputJournal::snapshot`].
pub type Snapshot = usize;

/// Append-only record of per-check outputs (spec §4.2).
#[derive(Clone, Default)]
pub struct OutputJournal {
    inner: Arc<RwLock<Inner>>,
}

impl OutputJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result, returning its monotone sequence number.
    pub fn append(&self, check_id: CheckId, scope: Scope, wave: u32, value: CheckResult) -> u64 {
        let mut inner = self.inner.write().expect("journal lock poisoned");
        let sequence = inner.entries.len() as u64;
        inner.entries.push(JournalEntry {
            check_id,
            scope,
            value,
            wave_of_production: wave,
            sequence,
        });
        sequence
    }

    /// Captures the current write frontier.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().expect("journal lock poisoned").entries.len()
    }

    /// Total entries written so far (used for the returned `JournalSummary`).
    pub fn entry_count(&self) -> usize {
        self.inner.read().expect("journal lock poisoned").entries.len()
    }

    pub fn checks_with_output(&self) -> Vec<CheckId> {
        let inner = self.inner.read().expect("journal lock poisoned");
        let mut ids: Vec<CheckId> = inner
            .entries
            .iter()
            .filter(|e| e.value.output.is_some())
            .map(|e| e.check_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// The leaf scopes `check_id` has a result at: the finest scope written
    /// for each fan-out branch, with any scope that is a strict prefix of
    /// another such scope dropped (this is what drops a forEach parent's own
    /// whole-list entry at its root scope once its per-iteration entries
    /// exist). This is what a dependent's own execution scopes are derived
    /// from (spec §4.5).
    pub fn leaf_scopes(&self, check_id: &str) -> Vec<Scope> {
        let inner = self.inner.read().expect("journal lock poisoned");
        let candidates: Vec<Scope> = inner
            .entries
            .iter()
            .filter(|e| e.check_id == check_id)
            .map(|e| e.scope.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        candidates
            .iter()
            .filter(|s| !candidates.iter().any(|other| *other != **s && s.is_prefix_of(other)))
            .cloned()
            .collect()
    }

    /// Every entry written so far, for property verification (spec §8
    /// property 2: at-most-once per wave per scope).
    pub fn all_entries(&self) -> Vec<JournalEntry> {
        self.inner.read().expect("journal lock poisoned").entries.clone()
    }

    /// A scoped view resolving reads against the given snapshot and scope.
    pub fn view(&self, snapshot: Snapshot, scope: Scope) -> ContextView {
        ContextView {
            inner: self.inner.clone(),
            snapshot,
            scope,
        }
    }
}

/// A reader's scoped, snapshotted view into the journal (spec §4.2, §4.6).
#[derive(Clone)]
pub struct ContextView {
    inner: Arc<RwLock<Inner>>,
    snapshot: Snapshot,
    scope: Scope,
}

impl ContextView {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Resolves `outputs[check_id]` at the current scope: the latest entry
    /// for `(check_id, s')` where `s'` is the longest prefix of the reader's
    /// scope with an entry, or `None` if there isn't one (spec §3 invariant,
    /// property 5).
    pub fn get(&self, check_id: &str) -> Option<CheckResult> {
        self.resolve(check_id, None).map(|e| e.value.clone())
    }

    /// The `-raw` escape hatch: the nearest ancestor (or current-scope)
    /// aggregate entry for a forEach dependent, bypassing per-iteration
    /// unwrapping (spec §4.2).
    pub fn get_raw(&self, check_id: &str) -> Option<CheckResult> {
        self.resolve(check_id, Some(true)).map(|e| e.value.clone())
    }

    /// `outputs.history[check_id]`: every entry previously recorded at the
    /// resolved scope, in wave order (spec §4.2).
    pub fn history(&self, check_id: &str) -> Vec<CheckResult> {
        let Some(resolved) = self.resolve(check_id, None) else {
            return Vec::new();
        };
        let resolved_scope = resolved.scope.clone();
        let inner = self.inner.read().expect("journal lock poisoned");
        let mut hist: Vec<JournalEntry> = inner
            .entries
            .iter()
            .take(self.snapshot)
            .filter(|e| e.check_id == check_id && e.scope == resolved_scope)
            .cloned()
            .collect();
        hist.sort_by_key(|e| e.sequence);
        hist.into_iter().map(|e| e.value).collect()
    }

    /// Finds the entry for `check_id` at the longest prefix of `self.scope`,
    /// restricted to the entry set visible at `self.snapshot`. When
    /// `require_for_each` is `Some(true)`, only aggregate entries
    /// (`is_for_each == true`) are considered, searching from the current
    /// scope upward — this is what makes `-raw` bypass unwrapping.
    fn resolve(&self, check_id: &str, require_for_each: Option<bool>) -> Option<JournalEntry> {
        let inner = self.inner.read().expect("journal lock poisoned");
        let visible = &inner.entries[..self.snapshot.min(inner.entries.len())];

        let mut best: Option<&JournalEntry> = None;
        let mut best_prefix_len = None;

        for entry in visible {
            if entry.check_id != check_id {
                continue;
            }
            if !entry.scope.is_prefix_of(&self.scope) {
                continue;
            }
            if let Some(want_for_each) = require_for_each {
                if entry.value.is_for_each != want_for_each {
                    continue;
                }
            }
            let prefix_len = entry.scope.0.len();
            let better = match (best_prefix_len, entry.sequence) {
                (None, _) => true,
                (Some(current_len), _) if prefix_len > current_len => true,
                (Some(current_len), _) if prefix_len == current_len => {
                    best.map(|b| entry.sequence > b.sequence).unwrap_or(true)
                }
                _ => false,
            };
            if better {
                best = Some(entry);
                best_prefix_len = Some(prefix_len);
            }
        }
        best.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(output: serde_json::Value) -> CheckResult {
        CheckResult {
            output: Some(output),
            ..Default::default()
        }
    }

    #[test]
    fn prefix_resolution_picks_longest_matching_scope() {
        let journal = OutputJournal::new();
        let root = Scope::root();
        let child = root.child("root", 0);

        journal.append("d".into(), root.clone(), 0, ok(serde_json::json!("root-value")));
        journal.append("d".into(), child.clone(), 1, ok(serde_json::json!("child-value")));
        let snap = journal.snapshot();

        let outside_view = journal.view(snap, root.clone());
        assert_eq!(
            outside_view.get("d").unwrap().output,
            Some(serde_json::json!("root-value"))
        );

        let inside_view = journal.view(snap, child.clone());
        assert_eq!(
            inside_view.get("d").unwrap().output,
            Some(serde_json::json!("child-value"))
        );
    }

    #[test]
    fn raw_escape_bypasses_unwrapping() {
        let journal = OutputJournal::new();
        let root = Scope::root();
        let child = root.child("root", 0);

        let mut aggregate = ok(serde_json::json!(["a", "b"]));
        aggregate.is_for_each = true;
        journal.append("c".into(), root.clone(), 0, aggregate);
        journal.append("c".into(), child.clone(), 1, ok(serde_json::json!("a")));
        let snap = journal.snapshot();

        let inside_view = journal.view(snap, child);
        assert_eq!(inside_view.get("c").unwrap().output, Some(serde_json::json!("a")));
        assert_eq!(
            inside_view.get_raw("c").unwrap().output,
            Some(serde_json::json!(["a", "b"]))
        );
    }

    #[test]
    fn history_returns_all_attempts_in_order() {
        let journal = OutputJournal::new();
        let scope = Scope::root();
        journal.append("build".into(), scope.clone(), 0, ok(serde_json::json!("fail-1")));
        journal.append("build".into(), scope.clone(), 2, ok(serde_json::json!("fail-2")));
        journal.append("build".into(), scope.clone(), 4, ok(serde_json::json!("ok")));
        let snap = journal.snapshot();

        let view = journal.view(snap, scope);
        let hist: Vec<_> = view.history("build").into_iter().map(|r| r.output).collect();
        assert_eq!(
            hist,
            vec![
                Some(serde_json::json!("fail-1")),
                Some(serde_json::json!("fail-2")),
                Some(serde_json::json!("ok")),
            ]
        );
    }

    #[test]
    fn snapshot_isolates_later_writes() {
        let journal = OutputJournal::new();
        let scope = Scope::root();
        journal.append("a".into(), scope.clone(), 0, ok(serde_json::json!(1)));
        let snap = journal.snapshot();
        journal.append("a".into(), scope.clone(), 1, ok(serde_json::json!(2)));

        let view = journal.view(snap, scope);
        assert_eq!(view.get("a").unwrap().output, Some(serde_json::json!(1)));
    }
}
