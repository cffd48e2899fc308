//! Message Store
//!
//! Information Hiding:
//! - The seen-id set and marker bookkeeping are private to the store
//! - Callers only append, reconcile, and read; existing turns are never
//!   reordered, removed, or edited apart from marker demotion

use super::policy::{self, NormalizeReport};
use crate::core::message::{Role, Turn};
use std::collections::HashSet;

/// What one reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub appended: usize,
    pub stripped: bool,
    pub marked: bool,
}

/// Ordered, append-only conversation log with id deduplication
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    turns: Vec<Turn>,
    seen_ids: HashSet<String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh conversation whose system prompt is the permanent cache prefix
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut store = Self::new();
        store.turns.push(Turn::system(prompt).with_cache_marker());
        store
    }

    /// Rebuild a store from a loaded log. Stray markers are normalized away.
    pub fn from_turns(mut turns: Vec<Turn>) -> (Self, NormalizeReport) {
        let report = policy::normalize(&mut turns);
        let seen_ids = turns
            .iter()
            .filter(|turn| turn.role.is_generated())
            .filter_map(|turn| turn.id.clone())
            .collect();

        (Self { turns, seen_ids }, report)
    }

    /// Append to the tail. Returns false if the turn's id is already known.
    pub fn append(&mut self, turn: Turn) -> bool {
        if let Some(id) = &turn.id {
            if !self.seen_ids.insert(id.clone()) {
                tracing::debug!("[MessageStore] Skipping duplicate turn '{}'", id);
                return false;
            }
        }
        self.turns.push(turn);
        true
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.append(Turn::user(text));
    }

    /// Merge the result batch of one exchange into the log.
    ///
    /// Only assistant and tool turns with an unseen id are appended; anything
    /// else in the batch is treated as already represented and dropped.
    pub fn reconcile(&mut self, batch: Vec<Turn>, enable_cache: bool) -> ReconcileReport {
        let mutations =
            policy::compute_mutations(&self.turns, &self.seen_ids, &batch, enable_cache);
        let mut report = ReconcileReport::default();

        if let Some(index) = mutations.strip_from {
            report.stripped = self.turns[index].strip_cache_marker();
        }

        for (index, mut turn) in batch.into_iter().enumerate() {
            if !turn.role.is_generated() {
                tracing::debug!("[MessageStore] Dropping {} turn from result batch", turn.role);
                continue;
            }
            if turn.id.is_none() {
                tracing::warn!("[MessageStore] Dropping unidentified {} turn", turn.role);
                continue;
            }
            if mutations.mark_on == Some(index) {
                turn.set_cache_marker();
                report.marked = true;
            }
            if self.append(turn) {
                report.appended += 1;
            }
        }

        tracing::debug!(
            "[MessageStore] Reconciled batch: {} appended, stripped={}, marked={}",
            report.appended,
            report.stripped,
            report.marked
        );
        report
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    pub fn non_system_marker_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.role != Role::System && turn.has_cache_marker())
            .count()
    }

    /// The last `n` turns
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}
