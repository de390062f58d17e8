use crate::client::TransferClient;
use crate::engine::MonitorEvent;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;
use url::Url;
use zfts_core::Backend;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROBE_INTERVAL,
            deadline: DEFAULT_PROBE_DEADLINE,
        }
    }
}

/// Aborts the wrapped task when dropped, so an in-flight probe dies with its loop.
struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Health probe loops, one per backend, on a fixed cadence of their own.
#[derive(Default)]
pub struct ProbeLoops {
    tasks: HashMap<Backend, JoinHandle<()>>,
}

impl ProbeLoops {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        backend: Backend,
        epoch: u64,
        settings: ProbeSettings,
        url: Url,
        client: TransferClient,
        tx: mpsc::Sender<MonitorEvent>,
    ) {
        self.stop(backend);
        let handle = tokio::spawn(probe_loop(backend, epoch, settings, url, client, tx));
        self.tasks.insert(backend, handle);
    }

    pub fn stop(&mut self, backend: Backend) -> bool {
        match self.tasks.remove(&backend) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, backend: Backend) -> bool {
        self.tasks.contains_key(&backend)
    }
}

impl Drop for ProbeLoops {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

async fn probe_loop(
    backend: Backend,
    epoch: u64,
    settings: ProbeSettings,
    url: Url,
    client: TransferClient,
    tx: mpsc::Sender<MonitorEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Option<AbortOnDrop> = None;
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        if in_flight.as_ref().is_some_and(|probe| !probe.is_finished()) {
            debug!(event = "probe_skipped", backend = backend.as_str(), epoch);
            continue;
        }
        let client = client.clone();
        let url = url.clone();
        let tx = tx.clone();
        in_flight = Some(AbortOnDrop(tokio::spawn(async move {
            let outcome = client.probe(&url, settings.deadline).await;
            let _ = tx
                .send(MonitorEvent::Probe {
                    backend,
                    epoch,
                    outcome,
                })
                .await;
        })));
    }
}
