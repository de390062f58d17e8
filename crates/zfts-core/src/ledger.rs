use crate::{Backend, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An in-flight user command that the backend has not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Starting,
    Stopping,
    Cancelling,
}

impl PendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingAction::Starting => "starting",
            PendingAction::Stopping => "stopping",
            PendingAction::Cancelling => "cancelling",
        }
    }

    /// Label shown on the button whose command is outstanding.
    pub fn busy_label(&self) -> &'static str {
        match self {
            PendingAction::Starting => "Sending…",
            PendingAction::Stopping => "Stopping…",
            PendingAction::Cancelling => "Cancelling…",
        }
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job ids are only unique per backend, so the backend is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    pub backend: Backend,
    pub job_id: JobId,
}

impl LedgerKey {
    pub fn new(backend: Backend, job_id: JobId) -> Self {
        Self { backend, job_id }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.backend, self.job_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingActionLedger {
    entries: HashMap<LedgerKey, PendingAction>,
}

impl PendingActionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records fresh user intent. Always overwrites; returns what it replaced.
    pub fn set(
        &mut self,
        backend: Backend,
        job_id: JobId,
        action: PendingAction,
    ) -> Option<PendingAction> {
        self.entries.insert(LedgerKey::new(backend, job_id), action)
    }

    pub fn get(&self, backend: Backend, job_id: JobId) -> Option<PendingAction> {
        self.entries.get(&LedgerKey::new(backend, job_id)).copied()
    }

    pub fn clear(&mut self, backend: Backend, job_id: JobId) -> Option<PendingAction> {
        self.entries.remove(&LedgerKey::new(backend, job_id))
    }

    /// Removes every entry matching `predicate`; returns how many went.
    pub fn clear_if<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&LedgerKey, PendingAction) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, action| !predicate(key, *action));
        before - self.entries.len()
    }

    pub fn clear_backend(&mut self, backend: Backend) -> usize {
        self.clear_if(|key, _| key.backend == backend)
    }

    pub fn entries_for(&self, backend: Backend) -> Vec<(JobId, PendingAction)> {
        let mut entries: Vec<(JobId, PendingAction)> = self
            .entries
            .iter()
            .filter(|(key, _)| key.backend == backend)
            .map(|(key, action)| (key.job_id, *action))
            .collect();
        entries.sort_by_key(|(job_id, _)| *job_id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_job_ids_on_two_backends_do_not_collide() {
        let mut ledger = PendingActionLedger::new();
        ledger.set(Backend::Ground, 7, PendingAction::Starting);
        ledger.set(Backend::Air, 7, PendingAction::Cancelling);

        assert_eq!(ledger.get(Backend::Ground, 7), Some(PendingAction::Starting));
        assert_eq!(ledger.get(Backend::Air, 7), Some(PendingAction::Cancelling));

        assert_eq!(ledger.clear(Backend::Air, 7), Some(PendingAction::Cancelling));
        assert_eq!(ledger.get(Backend::Ground, 7), Some(PendingAction::Starting));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn fresh_intent_overwrites_and_reports_previous() {
        let mut ledger = PendingActionLedger::new();
        assert_eq!(ledger.set(Backend::Ground, 1, PendingAction::Starting), None);
        assert_eq!(
            ledger.set(Backend::Ground, 1, PendingAction::Stopping),
            Some(PendingAction::Starting)
        );
        assert_eq!(ledger.get(Backend::Ground, 1), Some(PendingAction::Stopping));
    }

    #[test]
    fn clear_if_counts_removed_entries() {
        let mut ledger = PendingActionLedger::new();
        ledger.set(Backend::Ground, 1, PendingAction::Cancelling);
        ledger.set(Backend::Ground, 2, PendingAction::Starting);
        ledger.set(Backend::Air, 1, PendingAction::Cancelling);

        let removed = ledger.clear_if(|key, action| {
            key.backend == Backend::Ground && action == PendingAction::Cancelling
        });
        assert_eq!(removed, 1);
        assert_eq!(
            ledger.entries_for(Backend::Ground),
            vec![(2, PendingAction::Starting)]
        );
        assert_eq!(ledger.clear_backend(Backend::Air), 1);
        assert_eq!(ledger.clear_backend(Backend::Air), 0);
    }

    #[test]
    fn key_display_is_backend_prefixed() {
        assert_eq!(LedgerKey::new(Backend::Air, 12).to_string(), "Air_12");
    }
}
