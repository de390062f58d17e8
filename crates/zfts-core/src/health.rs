use crate::Backend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Idle,
    Connecting,
    Live,
    Unreachable,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Idle => "idle",
            HealthState::Connecting => "connecting",
            HealthState::Live => "live",
            HealthState::Unreachable => "unreachable",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, HealthState::Live)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeFailure {
    Timeout,
    Transport,
}

impl ProbeFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeFailure::Timeout => "timeout",
            ProbeFailure::Transport => "transport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub backend: Backend,
    pub from: HealthState,
    pub to: HealthState,
}

/// Liveness of one backend. Only probe and connect outcomes move it; job-list polls never do.
///
/// Ground starts `live` and only ever alternates between `live` and `unreachable`. Air starts
/// `idle`, enters `connecting` for an explicit connect attempt and returns to `idle` on
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitor {
    backend: Backend,
    state: HealthState,
    latency: Option<Duration>,
    last_failure: Option<ProbeFailure>,
}

impl HealthMonitor {
    pub fn new(backend: Backend) -> Self {
        let state = match backend {
            Backend::Ground => HealthState::Live,
            Backend::Air => HealthState::Idle,
        };
        Self {
            backend,
            state,
            latency: None,
            last_failure: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn last_failure(&self) -> Option<ProbeFailure> {
        self.last_failure
    }

    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }

    pub fn begin_connect(&mut self) -> Option<HealthTransition> {
        if self.backend == Backend::Ground {
            return None;
        }
        self.latency = None;
        self.last_failure = None;
        self.transition(HealthState::Connecting)
    }

    /// Outcome of the single fetch issued by a connect attempt. Ignored unless connecting.
    pub fn finish_connect(
        &mut self,
        outcome: Result<Duration, ProbeFailure>,
    ) -> Option<HealthTransition> {
        if self.state != HealthState::Connecting {
            return None;
        }
        self.apply_outcome(outcome)
    }

    /// Outcome of a recurring probe. Ignored while idle or mid-connect.
    pub fn record_probe(
        &mut self,
        outcome: Result<Duration, ProbeFailure>,
    ) -> Option<HealthTransition> {
        if matches!(self.state, HealthState::Idle | HealthState::Connecting) {
            return None;
        }
        self.apply_outcome(outcome)
    }

    pub fn disconnect(&mut self) -> Option<HealthTransition> {
        if self.backend == Backend::Ground {
            return None;
        }
        self.latency = None;
        self.last_failure = None;
        self.transition(HealthState::Idle)
    }

    pub fn status_text(&self) -> &'static str {
        match (self.backend, self.state) {
            (Backend::Ground, HealthState::Unreachable) => "Error",
            (Backend::Ground, _) => "Active",
            (Backend::Air, HealthState::Idle) => "Idle",
            (Backend::Air, HealthState::Connecting) => "Connecting…",
            (Backend::Air, HealthState::Live) => "Live",
            (Backend::Air, HealthState::Unreachable) => "Unreachable",
        }
    }

    pub fn latency_text(&self) -> String {
        match (self.state, self.latency) {
            (HealthState::Connecting, _) => "Ping: ...".to_string(),
            (HealthState::Unreachable, _) if self.last_failure.is_some() => "Ping: ❌".to_string(),
            (_, Some(latency)) => format!("Ping: {} ms", latency.as_millis()),
            _ => "Ping: N/A".to_string(),
        }
    }

    fn apply_outcome(
        &mut self,
        outcome: Result<Duration, ProbeFailure>,
    ) -> Option<HealthTransition> {
        match outcome {
            Ok(latency) => {
                self.latency = Some(latency);
                self.last_failure = None;
                self.transition(HealthState::Live)
            }
            Err(failure) => {
                self.latency = None;
                self.last_failure = Some(failure);
                self.transition(HealthState::Unreachable)
            }
        }
    }

    fn transition(&mut self, to: HealthState) -> Option<HealthTransition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(HealthTransition {
            backend: self.backend,
            from,
            to,
        })
    }
}
