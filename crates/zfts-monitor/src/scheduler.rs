use crate::client::TransferClient;
use crate::engine::{MonitorEvent, SnapshotSource};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use url::Url;
use zfts_core::Backend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL_CHOICES: [u64; 6] = [1, 2, 5, 10, 30, 60];

struct PollTask {
    handle: JoinHandle<()>,
    interval: Duration,
    epoch: u64,
}

/// One repeating job-list fetch per backend. Each tick spawns an independent fetch, so a slow
/// response can land after a newer one.
#[derive(Default)]
pub struct PollScheduler {
    tasks: HashMap<Backend, PollTask>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the ticker for `backend`. The old ticker is aborted before the new
    /// one exists, so two tickers never overlap.
    pub fn start(
        &mut self,
        backend: Backend,
        epoch: u64,
        interval: Duration,
        url: Url,
        client: TransferClient,
        tx: mpsc::Sender<MonitorEvent>,
    ) {
        let previous_ms = self.interval(backend).map(|previous| previous.as_millis() as u64);
        let restarted = self.stop(backend);
        debug!(
            event = "poll_restart",
            backend = backend.as_str(),
            epoch,
            interval_ms = interval.as_millis() as u64,
            previous_ms,
            restarted,
            url = %url,
        );
        let handle = tokio::spawn(poll_loop(backend, epoch, interval, url, client, tx));
        self.tasks.insert(
            backend,
            PollTask {
                handle,
                interval,
                epoch,
            },
        );
    }

    pub fn stop(&mut self, backend: Backend) -> bool {
        match self.tasks.remove(&backend) {
            Some(task) => {
                task.handle.abort();
                debug!(
                    event = "poll_stop",
                    backend = backend.as_str(),
                    epoch = task.epoch,
                );
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, backend: Backend) -> bool {
        self.tasks.contains_key(&backend)
    }

    pub fn interval(&self, backend: Backend) -> Option<Duration> {
        self.tasks.get(&backend).map(|task| task.interval)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }
}

async fn poll_loop(
    backend: Backend,
    epoch: u64,
    interval: Duration,
    url: Url,
    client: TransferClient,
    tx: mpsc::Sender<MonitorEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        let client = client.clone();
        let url = url.clone();
        let tx = tx.clone();
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
}

/// Next entry in the cadence picker, wrapping around.
pub fn next_poll_interval(current: Duration) -> Duration {
    let secs = current.as_secs();
    let next = POLL_INTERVAL_CHOICES
        .iter()
        .copied()
        .find(|choice| *choice > secs)
        .unwrap_or(POLL_INTERVAL_CHOICES[0]);
    Duration::from_secs(next)
}

pub fn previous_poll_interval(current: Duration) -> Duration {
    let secs = current.as_secs();
    let previous = POLL_INTERVAL_CHOICES
        .iter()
        .rev()
        .copied()
        .find(|choice| *choice < secs)
        .unwrap_or(POLL_INTERVAL_CHOICES[POLL_INTERVAL_CHOICES.len() - 1]);
    Duration::from_secs(previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_picker_cycles_through_choices() {
        assert_eq!(
            next_poll_interval(Duration::from_secs(5)),
            Duration::from_secs(10)
        );
        assert_eq!(
            next_poll_interval(Duration::from_secs(60)),
            Duration::from_secs(1)
        );
        assert_eq!(
            previous_poll_interval(Duration::from_secs(1)),
            Duration::from_secs(60)
        );
        assert_eq!(
            previous_poll_interval(Duration::from_secs(7)),
            Duration::from_secs(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_ticker() {
        let client = TransferClient::new().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let url = Url::parse("http://127.0.0.1:9/api/files").unwrap();
        let mut scheduler = PollScheduler::new();

        scheduler.start(
            Backend::Ground,
            0,
            Duration::from_secs(5),
            url.clone(),
            client.clone(),
            tx.clone(),
        );
        scheduler.start(
            Backend::Ground,
            0,
            Duration::from_secs(2),
            url,
            client,
            tx,
        );

        assert!(scheduler.is_running(Backend::Ground));
        assert_eq!(
            scheduler.interval(Backend::Ground),
            Some(Duration::from_secs(2))
        );
        assert!(scheduler.stop(Backend::Ground));
        assert!(!scheduler.stop(Backend::Ground));
        assert!(!scheduler.is_running(Backend::Air));
    }
}
