use crate::health::{HealthMonitor, HealthState};
use crate::ledger::{PendingAction, PendingActionLedger};
use crate::{Backend, JobCommand, JobId, TransferJob, MAX_PRIORITY, MIN_PRIORITY};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
    Cancel,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Cancel => "cancel",
        }
    }

    pub fn pending(&self) -> PendingAction {
        match self {
            Action::Start => PendingAction::Starting,
            Action::Stop => PendingAction::Stopping,
            Action::Cancel => PendingAction::Cancelling,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous refusal. No ledger entry is written and no request leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{backend} is {state}; action not sent")]
    BackendUnavailable { backend: Backend, state: HealthState },
    #[error("{backend} is not connected")]
    NotConnected { backend: Backend },
    #[error("job {job_id} is not in the {backend} queue")]
    UnknownJob { backend: Backend, job_id: JobId },
    #[error("job {job_id} on {backend} is still {pending}")]
    CommandInFlight {
        backend: Backend,
        job_id: JobId,
        pending: PendingAction,
    },
    #[error("priority {0} is outside {MIN_PRIORITY}..={MAX_PRIORITY}")]
    PriorityOutOfRange(u8),
    #[error("Enter hostname/IP")]
    EmptyHost,
}

/// An accepted command, ready to be sent exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub backend: Backend,
    pub job_id: JobId,
    pub command: JobCommand,
    /// Ledger entry written on acceptance; `None` for priority-only changes.
    pub pending: Option<PendingAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDispatcher {
    backend: Backend,
}

impl ActionDispatcher {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Validates, then records intent in the ledger before handing back the request to send.
    /// Start and Stop are refused while anything is outstanding for the job; Cancel may
    /// supersede an outstanding start or stop.
    pub fn dispatch(
        &self,
        ledger: &mut PendingActionLedger,
        health: &HealthMonitor,
        job: &TransferJob,
        action: Action,
        priority_override: Option<u8>,
    ) -> Result<DispatchPlan, Rejection> {
        self.ensure_available(health)?;
        if let Some(pending) = ledger.get(self.backend, job.id) {
            if action != Action::Cancel || pending == PendingAction::Cancelling {
                return Err(Rejection::CommandInFlight {
                    backend: self.backend,
                    job_id: job.id,
                    pending,
                });
            }
        }
        let command = match action {
            Action::Start => JobCommand::Start {
                priority: validate_priority(priority_override.unwrap_or(job.priority))?,
            },
            Action::Stop => JobCommand::Stop,
            Action::Cancel => JobCommand::Cancel,
        };
        let pending = action.pending();
        ledger.set(self.backend, job.id, pending);
        Ok(DispatchPlan {
            backend: self.backend,
            job_id: job.id,
            command,
            pending: Some(pending),
        })
    }

    /// Priority-only change. Leaves the ledger alone.
    pub fn dispatch_priority(
        &self,
        health: &HealthMonitor,
        job: &TransferJob,
        priority: u8,
    ) -> Result<DispatchPlan, Rejection> {
        self.ensure_available(health)?;
        Ok(DispatchPlan {
            backend: self.backend,
            job_id: job.id,
            command: JobCommand::SetPriority {
                priority: validate_priority(priority)?,
            },
            pending: None,
        })
    }

    pub fn ensure_available(&self, health: &HealthMonitor) -> Result<(), Rejection> {
        match health.state() {
            state if state.is_available() => Ok(()),
            HealthState::Idle => Err(Rejection::NotConnected {
                backend: self.backend,
            }),
            state => Err(Rejection::BackendUnavailable {
                backend: self.backend,
                state,
            }),
        }
    }
}

pub fn validate_priority(priority: u8) -> Result<u8, Rejection> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(priority)
    } else {
        Err(Rejection::PriorityOutOfRange(priority))
    }
}
