//! Merges an authoritative snapshot with the pending-action ledger into rows ready to render.
//!
//! A row's merged state depends only on the job's `started` flag and the ledger entry for
//! `(backend, job id)`. Resolved entries are cleared while merging, and entries whose job has
//! left the snapshot are collected afterwards, so a reused id never inherits an old overlay. Running the merge twice over the same
//! snapshot yields the same rows and the same ledger.

use crate::format::{format_file_size, format_percent, format_rate, format_remaining};
use crate::ledger::{PendingAction, PendingActionLedger};
use crate::{Backend, JobId, Snapshot, TransferJob};
use std::collections::HashSet;

pub const EMPTY_QUEUE_TEXT: &str = "No files currently in the transfer queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Running,
    Stopped,
}

impl DisplayState {
    pub fn label(&self) -> &'static str {
        match self {
            DisplayState::Running => "Running",
            DisplayState::Stopped => "Stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    pub label: &'static str,
    pub enabled: bool,
    pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonStates {
    pub start: ButtonState,
    pub stop: ButtonState,
    pub cancel: ButtonState,
    pub priority_enabled: bool,
}

impl ButtonStates {
    /// Start is offered for a stopped job and Stop for a running one, and only while nothing
    /// is outstanding for the job. Cancel stays available until a cancel is itself outstanding.
    pub fn derive(in_progress: bool, pending: Option<PendingAction>, available: bool) -> Self {
        let cancelling = pending == Some(PendingAction::Cancelling);
        let idle = pending.is_none();
        let busy = |action: PendingAction, idle_label: &'static str| {
            if pending == Some(action) {
                (action.busy_label(), true)
            } else {
                (idle_label, false)
            }
        };
        let (start_label, start_busy) = busy(PendingAction::Starting, "Start");
        let (stop_label, stop_busy) = busy(PendingAction::Stopping, "Stop");
        let (cancel_label, cancel_busy) = busy(PendingAction::Cancelling, "Cancel");
        Self {
            start: ButtonState {
                label: start_label,
                enabled: idle && !in_progress,
                busy: start_busy,
            },
            stop: ButtonState {
                label: stop_label,
                enabled: idle && in_progress,
                busy: stop_busy,
            },
            cancel: ButtonState {
                label: cancel_label,
                enabled: !cancelling,
                busy: cancel_busy,
            },
            priority_enabled: available,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub job: TransferJob,
    pub display_state: DisplayState,
    pub pending: Option<PendingAction>,
    pub buttons: ButtonStates,
    pub percent: String,
    pub rate: String,
    pub remaining: String,
    pub size: String,
}

impl JobRow {
    /// Pure merge of one job with its (already resolved) ledger entry.
    pub fn merge(job: &TransferJob, pending: Option<PendingAction>, available: bool) -> Self {
        let in_progress = job.started;
        Self {
            job: job.clone(),
            display_state: if in_progress {
                DisplayState::Running
            } else {
                DisplayState::Stopped
            },
            pending,
            buttons: ButtonStates::derive(in_progress, pending, available),
            percent: format_percent(job.percent_complete),
            rate: format_rate(job.rate),
            remaining: format_remaining(job),
            size: format_file_size(job.file_size),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableView {
    /// No connection target, or the backend's health probe failed.
    Disconnected,
    /// The last job-list fetch failed. Distinct from an empty queue.
    Unreachable,
    Jobs {
        platform_name: Option<String>,
        rows: Vec<JobRow>,
    },
}

impl TableView {
    pub fn rows(&self) -> &[JobRow] {
        match self {
            TableView::Jobs { rows, .. } => rows,
            _ => &[],
        }
    }

    pub fn platform_name(&self) -> Option<&str> {
        match self {
            TableView::Jobs { platform_name, .. } => platform_name.as_deref(),
            _ => None,
        }
    }

    /// Text shown in place of rows, if any.
    pub fn placeholder(&self, backend: Backend) -> Option<String> {
        match self {
            TableView::Disconnected => Some(format!("{backend} disconnected — no data")),
            TableView::Unreachable => {
                Some(format!("{backend} service unreachable — displaying no data"))
            }
            TableView::Jobs { rows, .. } if rows.is_empty() => Some(EMPTY_QUEUE_TEXT.to_string()),
            TableView::Jobs { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub view: TableView,
    pub resolved: Vec<(JobId, PendingAction)>,
    pub collected: usize,
}

/// One per backend; the same engine serves Ground and Air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    backend: Backend,
}

impl Reconciler {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn reconcile(
        &self,
        snapshot: &Snapshot,
        ledger: &mut PendingActionLedger,
        available: bool,
    ) -> Reconciliation {
        let backend = self.backend;
        let mut resolved = Vec::new();
        let mut rows = Vec::with_capacity(snapshot.status.len());

        for job in &snapshot.status {
            let mut pending = ledger.get(backend, job.id);
            let settled = match pending {
                Some(PendingAction::Starting) => job.started,
                Some(PendingAction::Stopping) => !job.started,
                _ => false,
            };
            if settled {
                if let Some(action) = ledger.clear(backend, job.id) {
                    resolved.push((job.id, action));
                }
                pending = None;
            }
            rows.push(JobRow::merge(job, pending, available));
        }

        let present: HashSet<JobId> = snapshot.job_ids().collect();
        let collected =
            ledger.clear_if(|key, _| key.backend == backend && !present.contains(&key.job_id));

        Reconciliation {
            view: TableView::Jobs {
                platform_name: snapshot.platform_name.clone(),
                rows,
            },
            resolved,
            collected,
        }
    }
}
