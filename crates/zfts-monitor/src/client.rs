use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;
use zfts_core::{parse_snapshot, JobCommand, ProbeFailure, Snapshot, UserInfo};

const USER_AGENT: &str = concat!("zfts-monitor/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("invalid payload: {0}")]
    Decode(String),
    #[error("no response within {0:?}")]
    ProbeTimeout(Duration),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ClientError {
    pub fn probe_failure(&self) -> ProbeFailure {
        match self {
            ClientError::ProbeTimeout(_) => ProbeFailure::Timeout,
            _ => ProbeFailure::Transport,
        }
    }
}

/// Thin HTTP transport shared by every background task. Requests carry no timeout of their
/// own; only probes and connect attempts are bounded.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Result<Self, ClientError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }

    pub async fn fetch_snapshot(&self, url: &Url) -> Result<Snapshot, ClientError> {
        let response = ensure_success(self.http.get(url.clone()).send().await?)?;
        let body = response.text().await?;
        parse_snapshot(&body).map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Fetch bounded by `deadline`, returning the round trip alongside the snapshot.
    pub async fn fetch_timed(
        &self,
        url: &Url,
        deadline: Duration,
    ) -> Result<(Duration, Snapshot), ClientError> {
        let started = Instant::now();
        let snapshot = tokio::time::timeout(deadline, self.fetch_snapshot(url))
            .await
            .map_err(|_| ClientError::ProbeTimeout(deadline))??;
        Ok((started.elapsed(), snapshot))
    }

    /// Liveness check against the job-list URL. The body is read but not parsed.
    pub async fn probe(&self, url: &Url, deadline: Duration) -> Result<Duration, ClientError> {
        let started = Instant::now();
        let request = async {
            let response = ensure_success(
                self.http
                    .get(url.clone())
                    .header(CACHE_CONTROL, "no-store")
                    .send()
                    .await?,
            )?;
            response.bytes().await?;
            Ok::<(), ClientError>(())
        };
        tokio::time::timeout(deadline, request)
            .await
            .map_err(|_| ClientError::ProbeTimeout(deadline))??;
        Ok(started.elapsed())
    }

    pub async fn send_command(&self, url: &Url, command: JobCommand) -> Result<(), ClientError> {
        ensure_success(
            self.http
                .post(url.clone())
                .json(&command.body())
                .send()
                .await?,
        )?;
        Ok(())
    }

    pub async fn fetch_user_info(&self, url: &Url) -> Result<UserInfo, ClientError> {
        let response = ensure_success(self.http.get(url.clone()).send().await?)?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| ClientError::Decode(err.to_string()))
    }

    pub async fn open_push(&self, url: &Url) -> Result<Response, ClientError> {
        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;
        ensure_success(response)
    }
}

fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status(status.as_u16()))
    }
}
