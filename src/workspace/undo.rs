//! Undo journal for edits applied under `FailureHandlingKind::Undo`.
//!
//! Each journal entry holds the change records of one application attempt.
//! Entries expire according to an [`UndoRetention`] policy: by count, oldest
//! first, and optionally by age.

use crate::config::UndoRetention;
use crate::types::DocumentUri;
use crate::workspace::store::DocumentSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// State of one document before and after a change. `None` means the
/// document did not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub uri: DocumentUri,
    pub before: Option<DocumentSnapshot>,
    pub after: Option<DocumentSnapshot>,
}

/// Handle to a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UndoToken(pub u64);

impl fmt::Display for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record that could not be reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoFailure {
    pub uri: DocumentUri,
    pub reason: String,
}

/// Outcome of a best-effort undo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoReport {
    /// Documents restored to their state before the edit.
    pub reverted: Vec<DocumentUri>,
    /// Documents that could not be restored.
    pub failures: Vec<UndoFailure>,
}

impl UndoReport {
    /// Whether every record was reverted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for UndoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            write!(f, "undo reverted {} document(s)", self.reverted.len())
        } else {
            let failed: Vec<String> = self
                .failures
                .iter()
                .map(|failure| format!("{} ({})", failure.uri, failure.reason))
                .collect();
            write!(
                f,
                "undo reverted {} document(s), failed on {}",
                self.reverted.len(),
                failed.join(", ")
            )
        }
    }
}

#[derive(Debug)]
struct JournalEntry {
    token: UndoToken,
    created: Instant,
    label: Option<String>,
    records: Vec<ChangeRecord>,
}

/// Bounded store of undo journals.
#[derive(Debug)]
pub(crate) struct UndoJournal {
    retention: UndoRetention,
    next_token: u64,
    entries: VecDeque<JournalEntry>,
}

impl UndoJournal {
    pub(crate) fn new(retention: UndoRetention) -> Self {
        Self {
            retention,
            next_token: 1,
            entries: VecDeque::new(),
        }
    }

    /// Store the records of one attempt and return its token.
    pub(crate) fn record(
        &mut self,
        label: Option<String>,
        records: Vec<ChangeRecord>,
        now: Instant,
    ) -> UndoToken {
        let token = UndoToken(self.next_token);
        self.next_token += 1;
        self.entries.push_back(JournalEntry {
            token,
            created: now,
            label,
            records,
        });
        self.prune(now);
        token
    }

    /// Remove and return the records for `token`, if still retained.
    pub(crate) fn take(&mut self, token: UndoToken, now: Instant) -> Option<Vec<ChangeRecord>> {
        self.prune(now);
        let position = self.entries.iter().position(|entry| entry.token == token)?;
        let entry = self.entries.remove(position)?;
        log::debug!(
            "Taking undo journal {} ({})",
            entry.token,
            entry.label.as_deref().unwrap_or("unlabelled")
        );
        Some(entry.records)
    }

    pub(crate) fn prune(&mut self, now: Instant) {
        if let Some(max_age) = self.retention.max_age() {
            self.entries
                .retain(|entry| now.saturating_duration_since(entry.created) < max_age);
        }
        while self.entries.len() > self.retention.max_entries {
            if let Some(evicted) = self.entries.pop_front() {
                log::debug!("Evicting undo journal {}", evicted.token);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
