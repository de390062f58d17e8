//! Single-owner session engine. Background tasks never touch this state: they report through
//! [`MonitorEvent`]s, and every mutation happens in [`Monitor::apply_event`] or a user-action
//! method, which updates the ledger and the view before returning.

use crate::client::{ClientError, TransferClient};
use crate::endpoint::{userinfo_url, AirTarget, Endpoint};
use crate::probe::ProbeLoops;
use crate::push::run_push;
use crate::scheduler::{next_poll_interval, previous_poll_interval, PollScheduler};
use crate::settings::{save_air_target, MonitorConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use zfts_core::{
    Action, ActionDispatcher, Backend, DispatchPlan, HealthMonitor, HealthState,
    HealthTransition, JobCommand, JobId, PendingActionLedger, Reconciler, Rejection, Snapshot,
    TableView, UserInfo, UNKNOWN_USER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Poll,
    Push,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Poll => "poll",
            SnapshotSource::Push => "push",
        }
    }
}

#[derive(Debug)]
pub enum MonitorEvent {
    Snapshot {
        backend: Backend,
        epoch: u64,
        source: SnapshotSource,
        result: Result<Snapshot, ClientError>,
    },
    Probe {
        backend: Backend,
        epoch: u64,
        outcome: Result<Duration, ClientError>,
    },
    /// Outcome of the single fetch issued by an Air connect attempt.
    Connected {
        epoch: u64,
        result: Result<(Duration, Snapshot), ClientError>,
    },
    CommandResult {
        backend: Backend,
        job_id: JobId,
        command: JobCommand,
        result: Result<(), ClientError>,
    },
    PushConnected {
        epoch: u64,
    },
    PushClosed {
        epoch: u64,
        reason: String,
    },
    UserInfo(Result<UserInfo, ClientError>),
    AutoReconnect {
        epoch: u64,
    },
}

/// Everything the engine knows about one backend.
#[derive(Debug)]
pub struct BackendSession {
    backend: Backend,
    endpoint: Option<Endpoint>,
    epoch: u64,
    poll_interval: Duration,
    health: HealthMonitor,
    reconciler: Reconciler,
    dispatcher: ActionDispatcher,
    view: TableView,
    last_snapshot: Option<Snapshot>,
}

impl BackendSession {
    fn new(backend: Backend, endpoint: Option<Endpoint>, poll_interval: Duration) -> Self {
        let view = match backend {
            Backend::Ground => TableView::Jobs {
                platform_name: None,
                rows: Vec::new(),
            },
            Backend::Air => TableView::Disconnected,
        };
        Self {
            backend,
            endpoint,
            epoch: 0,
            poll_interval,
            health: HealthMonitor::new(backend),
            reconciler: Reconciler::new(backend),
            dispatcher: ActionDispatcher::new(backend),
            view,
            last_snapshot: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn view(&self) -> &TableView {
        &self.view
    }

    fn list_url(&self) -> Option<Url> {
        let endpoint = self.endpoint.as_ref()?;
        match endpoint.list_url() {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(
                    event = "endpoint_error",
                    backend = self.backend.as_str(),
                    error = %err,
                );
                None
            }
        }
    }

    fn clear_view(&mut self, view: TableView) {
        self.view = view;
        self.last_snapshot = None;
    }
}

pub struct Monitor {
    config: MonitorConfig,
    client: TransferClient,
    tx: mpsc::Sender<MonitorEvent>,
    ground: BackendSession,
    air: BackendSession,
    ledger: PendingActionLedger,
    scheduler: PollScheduler,
    probes: ProbeLoops,
    push: Option<JoinHandle<()>>,
    push_live: bool,
    air_target: AirTarget,
    user: Option<UserInfo>,
    status_note: Option<String>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        client: TransferClient,
        tx: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        let ground = BackendSession::new(
            Backend::Ground,
            Some(Endpoint::direct(config.ground_url.clone())),
            config.ground_poll,
        );
        let air = BackendSession::new(Backend::Air, None, config.air_poll);
        let air_target = config.air_target.clone().unwrap_or_default();
        Self {
            config,
            client,
            tx,
            ground,
            air,
            ledger: PendingActionLedger::new(),
            scheduler: PollScheduler::new(),
            probes: ProbeLoops::new(),
            push: None,
            push_live: false,
            air_target,
            user: None,
            status_note: None,
        }
    }

    /// Initial Ground fetch, Ground loops, optional push, user lookup and the delayed Air
    /// auto-reconnect.
    pub fn start(&mut self) {
        if let Some(url) = self.ground.list_url() {
            self.spawn_fetch(Backend::Ground, self.ground.epoch, url);
        }
        self.start_loops(Backend::Ground);
        if self.config.push_enabled {
            self.start_push();
        }
        self.spawn_user_info();
        if self.config.air_target.is_some() {
            let tx = self.tx.clone();
            let epoch = self.air.epoch;
            let delay = self.config.auto_reconnect_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(MonitorEvent::AutoReconnect { epoch }).await;
            });
        }
    }

    pub fn session(&self, backend: Backend) -> &BackendSession {
        match backend {
            Backend::Ground => &self.ground,
            Backend::Air => &self.air,
        }
    }

    fn session_mut(&mut self, backend: Backend) -> &mut BackendSession {
        match backend {
            Backend::Ground => &mut self.ground,
            Backend::Air => &mut self.air,
        }
    }

    pub fn ledger(&self) -> &PendingActionLedger {
        &self.ledger
    }

    pub fn air_target(&self) -> &AirTarget {
        &self.air_target
    }

    pub fn status_note(&self) -> Option<&str> {
        self.status_note.as_deref()
    }

    pub fn set_status_note(&mut self, note: impl Into<String>) {
        self.status_note = Some(note.into());
    }

    pub fn clear_status_note(&mut self) {
        self.status_note = None;
    }

    pub fn user_display_name(&self) -> String {
        self.user
            .as_ref()
            .map(UserInfo::display_name)
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    pub fn user_detail(&self) -> Option<&str> {
        self.user.as_ref().and_then(|user| user.dn.as_deref())
    }

    pub fn is_polling(&self, backend: Backend) -> bool {
        self.scheduler.is_running(backend)
    }

    pub fn is_probing(&self, backend: Backend) -> bool {
        self.probes.is_running(backend)
    }

    pub fn push_live(&self) -> bool {
        self.push_live
    }

    pub fn connect_air(&mut self, target: AirTarget) -> Result<(), Rejection> {
        let target = AirTarget::new(target.host, target.port);
        if target.is_empty() {
            return Err(self.reject(Rejection::EmptyHost));
        }
        self.remember_target(&target);
        self.stop_loops(Backend::Air);
        self.air.epoch += 1;
        self.clear_air_ledger();
        self.air.endpoint = Some(Endpoint::proxied(
            self.config.proxy_url.clone(),
            target.clone(),
        ));
        self.air.clear_view(TableView::Disconnected);
        let transition = self.air.health.begin_connect();
        self.log_transition(transition);

        let Some(url) = self.air.list_url() else {
            let transition = self
                .air
                .health
                .finish_connect(Err(zfts_core::ProbeFailure::Transport));
            self.log_transition(transition);
            self.air.clear_view(TableView::Unreachable);
            return Ok(());
        };
        let client = self.client.clone();
        let tx = self.tx.clone();
        let epoch = self.air.epoch;
        let deadline = self.config.probe.deadline;
        tokio::spawn(async move {
            let result = client.fetch_timed(&url, deadline).await;
            let _ = tx.send(MonitorEvent::Connected { epoch, result }).await;
        });
        info!(event = "air_connect", target = %target, epoch);
        self.status_note = Some(format!("Connecting to Air at {target}…"));
        Ok(())
    }

    pub fn disconnect_air(&mut self) {
        self.stop_loops(Backend::Air);
        self.air.epoch += 1;
        self.air.endpoint = None;
        let transition = self.air.health.disconnect();
        self.log_transition(transition);
        self.clear_air_ledger();
        self.air.clear_view(TableView::Disconnected);
        info!(event = "air_disconnect", epoch = self.air.epoch);
        self.status_note = Some("Air disconnected".to_string());
    }

    /// Points Air at a new host/port. While disconnected this only updates the remembered
    /// draft. Otherwise Air reconnects, so the new host is `connecting` until its first fetch
    /// answers and actions stay gated until then.
    pub fn retarget_air(&mut self, target: AirTarget) -> Result<(), Rejection> {
        let target = AirTarget::new(target.host, target.port);
        if self.air.health.state() == HealthState::Idle {
            self.air_target = target;
            return Ok(());
        }
        info!(event = "air_retarget", target = %target, epoch = self.air.epoch);
        self.connect_air(target)
    }

    /// Changes the poll cadence. A running ticker is replaced against the endpoint current at
    /// this moment; the epoch is unchanged, so in-flight polls still land.
    pub fn set_poll_interval(&mut self, backend: Backend, interval: Duration) {
        let session = self.session_mut(backend);
        session.poll_interval = interval;
        if self.scheduler.is_running(backend) {
            self.start_poll(backend);
        }
        self.status_note = Some(format!(
            "{backend} poll every {}s",
            interval.as_secs()
        ));
    }

    pub fn cycle_poll_interval(&mut self, backend: Backend, forward: bool) {
        let current = self.session(backend).poll_interval;
        let next = if forward {
            next_poll_interval(current)
        } else {
            previous_poll_interval(current)
        };
        self.set_poll_interval(backend, next);
    }

    /// Start, Stop or Cancel for one job. On acceptance the ledger and the view reflect the
    /// intent before the request is sent.
    pub fn dispatch(
        &mut self,
        backend: Backend,
        job_id: JobId,
        action: Action,
        priority_override: Option<u8>,
    ) -> Result<(), Rejection> {
        let (session, ledger) = match backend {
            Backend::Ground => (&self.ground, &mut self.ledger),
            Backend::Air => (&self.air, &mut self.ledger),
        };
        let planned = match find_job(session, job_id) {
            Ok(job) => {
                session
                    .dispatcher
                    .dispatch(ledger, &session.health, &job, action, priority_override)
            }
            Err(rejection) => Err(rejection),
        };
        let plan = planned.map_err(|rejection| self.reject(rejection))?;
        self.refresh_view(backend);
        self.send_plan(plan);
        Ok(())
    }

    /// Priority-only change; no ledger entry.
    pub fn set_priority(
        &mut self,
        backend: Backend,
        job_id: JobId,
        priority: u8,
    ) -> Result<(), Rejection> {
        let session = self.session(backend);
        let planned = find_job(session, job_id).and_then(|job| {
            session
                .dispatcher
                .dispatch_priority(&session.health, &job, priority)
        });
        let plan = planned.map_err(|rejection| self.reject(rejection))?;
        self.send_plan(plan);
        Ok(())
    }

    pub fn apply_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Snapshot {
                backend,
                epoch,
                source,
                result,
            } => {
                if self.is_stale(backend, epoch, "snapshot") {
                    return;
                }
                match result {
                    Ok(snapshot) => {
                        debug!(
                            event = "snapshot_applied",
                            backend = backend.as_str(),
                            source = source.as_str(),
                            jobs = snapshot.status.len(),
                        );
                        self.render_snapshot(backend, snapshot);
                    }
                    Err(err) => {
                        debug!(
                            event = "snapshot_failed",
                            backend = backend.as_str(),
                            source = source.as_str(),
                            error = %err,
                        );
                        self.session_mut(backend).clear_view(TableView::Unreachable);
                    }
                }
            }
            MonitorEvent::Probe {
                backend,
                epoch,
                outcome,
            } => {
                if self.is_stale(backend, epoch, "probe") {
                    return;
                }
                let outcome = outcome.map_err(|err| {
                    info!(
                        event = "probe_result",
                        backend = backend.as_str(),
                        ok = false,
                        error = %err,
                    );
                    err.probe_failure()
                });
                if let Ok(latency) = &outcome {
                    info!(
                        event = "probe_result",
                        backend = backend.as_str(),
                        ok = true,
                        latency_ms = latency.as_millis() as u64,
                    );
                }
                let session = self.session_mut(backend);
                let transition = session.health.record_probe(outcome);
                if transition.is_some() && session.health.state() == HealthState::Unreachable {
                    session.clear_view(TableView::Disconnected);
                }
                self.log_transition(transition);
            }
            MonitorEvent::Connected { epoch, result } => {
                if self.is_stale(Backend::Air, epoch, "connected") {
                    return;
                }
                match result {
                    Ok((latency, snapshot)) => {
                        let transition = self.air.health.finish_connect(Ok(latency));
                        self.log_transition(transition);
                        self.render_snapshot(Backend::Air, snapshot);
                        self.start_loops(Backend::Air);
                        self.status_note = Some(format!("Air connected to {}", self.air_target));
                    }
                    Err(err) => {
                        let transition = self.air.health.finish_connect(Err(err.probe_failure()));
                        self.log_transition(transition);
                        self.air.clear_view(TableView::Unreachable);
                        warn!(event = "air_connect_failed", epoch, error = %err);
                        self.status_note = Some(format!("Air connect failed: {err}"));
                    }
                }
            }
            MonitorEvent::CommandResult {
                backend,
                job_id,
                command,
                result,
            } => match result {
                Ok(()) => {
                    debug!(
                        event = "command_acknowledged",
                        backend = backend.as_str(),
                        job_id,
                        command = command.name(),
                    );
                }
                Err(err) => {
                    warn!(
                        event = "command_failed",
                        backend = backend.as_str(),
                        job_id,
                        command = command.name(),
                        error = %err,
                    );
                    self.status_note = Some(format!(
                        "{} failed for job {job_id} on {backend}: {err}",
                        command.name()
                    ));
                }
            },
            MonitorEvent::PushConnected { epoch } => {
                if self.is_stale(Backend::Ground, epoch, "push_connected") {
                    return;
                }
                self.push_live = true;
                self.scheduler.stop(Backend::Ground);
            }
            MonitorEvent::PushClosed { epoch, reason } => {
                if self.is_stale(Backend::Ground, epoch, "push_closed") {
                    return;
                }
                let was_live = self.push_live;
                self.push_live = false;
                if !self.scheduler.is_running(Backend::Ground) {
                    self.start_poll(Backend::Ground);
                }
                if was_live {
                    self.status_note = Some(format!("Ground push closed ({reason}); polling"));
                }
            }
            MonitorEvent::UserInfo(result) => match result {
                Ok(user) => self.user = Some(user),
                Err(err) => {
                    warn!(event = "user_info_error", error = %err);
                    self.user = None;
                }
            },
            MonitorEvent::AutoReconnect { epoch } => {
                if epoch != self.air.epoch || self.air.health.state() != HealthState::Idle {
                    debug!(event = "stale_event_discarded", kind = "auto_reconnect", epoch);
                    return;
                }
                let target = self.air_target.clone();
                let _ = self.connect_air(target);
            }
        }
    }

    /// Stops every background task. Further events from in-flight work are discarded.
    pub fn shutdown(&mut self) {
        for backend in Backend::ALL {
            self.stop_loops(backend);
        }
        if let Some(push) = self.push.take() {
            push.abort();
        }
        self.push_live = false;
    }

    fn is_stale(&self, backend: Backend, epoch: u64, kind: &'static str) -> bool {
        let current = self.session(backend).epoch;
        if epoch != current {
            debug!(
                event = "stale_event_discarded",
                backend = backend.as_str(),
                kind,
                epoch,
                current,
            );
            return true;
        }
        false
    }

    fn render_snapshot(&mut self, backend: Backend, snapshot: Snapshot) {
        let session = match backend {
            Backend::Ground => &mut self.ground,
            Backend::Air => &mut self.air,
        };
        let available = session.health.is_available();
        let outcome = session
            .reconciler
            .reconcile(&snapshot, &mut self.ledger, available);
        for (job_id, action) in &outcome.resolved {
            info!(
                event = "ledger_resolved",
                backend = backend.as_str(),
                job_id,
                action = action.as_str(),
            );
        }
        if outcome.collected > 0 {
            info!(
                event = "ledger_gc",
                backend = backend.as_str(),
                removed = outcome.collected,
            );
        }
        session.view = outcome.view;
        session.last_snapshot = Some(snapshot);
    }

    /// Re-merges the last snapshot so a fresh ledger entry shows without waiting for a poll.
    fn refresh_view(&mut self, backend: Backend) {
        let session = self.session(backend);
        if !matches!(session.view, TableView::Jobs { .. }) {
            return;
        }
        let snapshot = session.last_snapshot.clone();
        if let Some(snapshot) = snapshot {
            self.render_snapshot(backend, snapshot);
        }
    }

    fn send_plan(&mut self, plan: DispatchPlan) {
        let backend = plan.backend;
        let url = match self.session(backend).endpoint.as_ref() {
            Some(endpoint) => endpoint.job_url(plan.job_id),
            None => Err(ClientError::InvalidEndpoint(format!("{backend} has no endpoint"))),
        };
        let url = match url {
            Ok(url) => url,
            Err(err) => {
                warn!(
                    event = "command_failed",
                    backend = backend.as_str(),
                    job_id = plan.job_id,
                    command = plan.command.name(),
                    error = %err,
                );
                self.status_note = Some(format!("{} not sent: {err}", plan.command.name()));
                return;
            }
        };
        info!(
            event = "command_dispatched",
            backend = backend.as_str(),
            job_id = plan.job_id,
            command = plan.command.name(),
            pending = plan.pending.map(|pending| pending.as_str()).unwrap_or("none"),
        );
        self.status_note = Some(format!(
            "{} sent for job {} on {backend}",
            plan.command.name(),
            plan.job_id
        ));
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = client.send_command(&url, plan.command).await;
            let _ = tx
                .send(MonitorEvent::CommandResult {
                    backend,
                    job_id: plan.job_id,
                    command: plan.command,
                    result,
                })
                .await;
        });
    }

    fn reject(&mut self, rejection: Rejection) -> Rejection {
        warn!(event = "dispatch_rejected", reason = %rejection);
        self.status_note = Some(rejection.to_string());
        rejection
    }

    fn start_loops(&mut self, backend: Backend) {
        if !(backend == Backend::Ground && self.push_live) {
            self.start_poll(backend);
        }
        let session = self.session(backend);
        let Some(url) = session.list_url() else {
            return;
        };
        let epoch = session.epoch;
        self.probes.start(
            backend,
            epoch,
            self.config.probe,
            url,
            self.client.clone(),
            self.tx.clone(),
        );
    }

    fn start_poll(&mut self, backend: Backend) {
        let session = self.session(backend);
        let Some(url) = session.list_url() else {
            return;
        };
        let epoch = session.epoch;
        let interval = session.poll_interval;
        self.scheduler.start(
            backend,
            epoch,
            interval,
            url,
            self.client.clone(),
            self.tx.clone(),
        );
    }

    fn stop_loops(&mut self, backend: Backend) {
        self.scheduler.stop(backend);
        self.probes.stop(backend);
    }

    fn start_push(&mut self) {
        let url = match self.ground.endpoint.as_ref().map(Endpoint::push_url) {
            Some(Ok(url)) => url,
            Some(Err(err)) => {
                warn!(event = "push_unavailable", error = %err);
                return;
            }
            None => return,
        };
        if let Some(previous) = self.push.take() {
            previous.abort();
        }
        self.push = Some(tokio::spawn(run_push(
            Backend::Ground,
            self.ground.epoch,
            url,
            self.client.clone(),
            self.tx.clone(),
        )));
    }

    fn spawn_fetch(&self, backend: Backend, epoch: u64, url: Url) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_snapshot(&url).await;
            if let Err(err) = &result {
                warn!(
                    event = "poll_fetch_error",
                    backend = backend.as_str(),
                    epoch,
                    error = %err,
                );
            }
            let _ = tx
                .send(MonitorEvent::Snapshot {
                    backend,
                    epoch,
                    source: SnapshotSource::Poll,
                    result,
                })
                .await;
        });
    }

    fn spawn_user_info(&self) {
        let url = match userinfo_url(&self.config.proxy_url) {
            Ok(url) => url,
            Err(err) => {
                warn!(event = "user_info_error", error = %err);
                return;
            }
        };
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_user_info(&url).await;
            let _ = tx.send(MonitorEvent::UserInfo(result)).await;
        });
    }

    fn remember_target(&mut self, target: &AirTarget) {
        self.air_target = target.clone();
        if let Err(err) = save_air_target(&self.config.air_target_path(), target) {
            warn!(event = "settings_save_error", error = %err);
        }
    }

    fn clear_air_ledger(&mut self) {
        let removed = self.ledger.clear_backend(Backend::Air);
        if removed > 0 {
            info!(event = "ledger_gc", backend = "Air", removed);
        }
    }

    fn log_transition(&self, transition: Option<HealthTransition>) {
        if let Some(transition) = transition {
            let failure = self
                .session(transition.backend)
                .health
                .last_failure()
                .filter(|_| transition.to == HealthState::Unreachable)
                .map(|failure| failure.as_str());
            info!(
                event = "health_transition",
                backend = transition.backend.as_str(),
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                failure,
            );
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(push) = self.push.take() {
            push.abort();
        }
    }
}

fn find_job(session: &BackendSession, job_id: JobId) -> Result<zfts_core::TransferJob, Rejection> {
    if let Some(row) = session.view.rows().iter().find(|row| row.job.id == job_id) {
        return Ok(row.job.clone());
    }
    session.dispatcher.ensure_available(&session.health)?;
    Err(Rejection::UnknownJob {
        backend: session.backend,
        job_id,
    })
}
