//! Server-sent job-list updates. Each `status` event carries the same document a poll returns.

use crate::client::TransferClient;
use crate::engine::{MonitorEvent, SnapshotSource};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;
use zfts_core::{parse_snapshot, Backend};

pub const STATUS_EVENT: &str = "status";
pub const DEFAULT_MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SseReport {
    pub events: Vec<SseEvent>,
    pub errors: Vec<String>,
}

/// Incremental `text/event-stream` parser. Chunks may split lines anywhere.
pub struct SseDecoder {
    max_event_bytes: usize,
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_bytes: usize,
}

impl SseDecoder {
    pub fn new(max_event_bytes: usize) -> Self {
        Self {
            max_event_bytes,
            pending: Vec::new(),
            event: None,
            data: Vec::new(),
            data_bytes: 0,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> SseReport {
        let mut report = SseReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }

        if self.pending.len() + self.data_bytes > self.max_event_bytes {
            report.errors.push(format!(
                "event exceeds {} bytes; dropped",
                self.max_event_bytes
            ));
            self.pending.clear();
            self.reset_event();
        }

        report
    }

    /// Flushes a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> SseReport {
        let mut report = SseReport::default();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.process_line(&line, &mut report);
        }
        self.dispatch(&mut report);
        report
    }

    fn process_line(&mut self, line: &[u8], report: &mut SseReport) {
        if line.is_empty() {
            self.dispatch(report);
            return;
        }
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(err) => {
                report.errors.push(format!("invalid utf-8: {err}"));
                return;
            }
        };
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_bytes += value.len();
                self.data.push(value.to_string());
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, report: &mut SseReport) {
        if self.data.is_empty() {
            self.reset_event();
            return;
        }
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        let data = self.data.join("\n");
        self.reset_event();
        report.events.push(SseEvent { event, data });
    }

    fn reset_event(&mut self) {
        self.event = None;
        self.data.clear();
        self.data_bytes = 0;
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENT_BYTES)
    }
}

/// Keeps a push stream open for `backend`, reconnecting with backoff. Runs until aborted or
/// until the event channel closes.
pub async fn run_push(
    backend: Backend,
    epoch: u64,
    url: Url,
    client: TransferClient,
    tx: mpsc::Sender<MonitorEvent>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let reason = match client.open_push(&url).await {
            Ok(response) => {
                backoff = INITIAL_BACKOFF;
                info!(event = "push_connected", backend = backend.as_str(), epoch, url = %url);
                if tx.send(MonitorEvent::PushConnected { epoch }).await.is_err() {
                    return;
                }
                let mut decoder = SseDecoder::default();
                let mut stream = response.bytes_stream();
                let mut reason = None;
                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            reason = Some(err.to_string());
                            break;
                        }
                    };
                    let report = decoder.push_chunk(&chunk);
                    if !forward(backend, epoch, report, &tx).await {
                        return;
                    }
                }
                let report = decoder.finish();
                if !forward(backend, epoch, report, &tx).await {
                    return;
                }
                reason.unwrap_or_else(|| "stream ended".to_string())
            }
            Err(err) => err.to_string(),
        };
        info!(
            event = "push_closed",
            backend = backend.as_str(),
            epoch,
            reason = %reason,
            retry_ms = backoff.as_millis() as u64,
        );
        if tx
            .send(MonitorEvent::PushClosed { epoch, reason })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

async fn forward(
    backend: Backend,
    epoch: u64,
    report: SseReport,
    tx: &mpsc::Sender<MonitorEvent>,
) -> bool {
    for err in report.errors {
        warn!(event = "push_decode_error", backend = backend.as_str(), error = %err);
    }
    for event in report.events {
        if event.event != STATUS_EVENT {
            continue;
        }
        let snapshot = match parse_snapshot(&event.data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(event = "push_decode_error", backend = backend.as_str(), error = %err);
                continue;
            }
        };
        let sent = tx
            .send(MonitorEvent::Snapshot {
                backend,
                epoch,
                source: SnapshotSource::Push,
                result: Ok(snapshot),
            })
            .await;
        if sent.is_err() {
            return false;
        }
    }
    true
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > MAX_BACKOFF {
        MAX_BACKOFF
    } else {
        next
    }
}
