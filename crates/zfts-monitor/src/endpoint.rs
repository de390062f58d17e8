use crate::client::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use zfts_core::JobId;

pub const DEFAULT_AIR_PORT: u16 = 19712;

const FILES_PATH: &str = "files";
const PUSH_PATH: &str = "files.sse";
const PROXY_PATH: &str = "airproxy";
const USERINFO_PATH: &str = "userinfo";

/// Host and port of the Air service as the user typed them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AirTarget {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_air_port")]
    pub port: u16,
}

fn default_air_port() -> u16 {
    DEFAULT_AIR_PORT
}

impl AirTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().trim().to_string(),
            port,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.trim().is_empty()
    }
}

impl Default for AirTarget {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_AIR_PORT,
        }
    }
}

impl fmt::Display for AirTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.trim(), self.port)
    }
}

/// Where one backend's job list lives. Ground talks to its service directly; Air goes through
/// the proxy with the target carried in the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Direct { base: Url },
    Proxied { proxy: Url, target: AirTarget },
}

impl Endpoint {
    pub fn direct(base: Url) -> Self {
        Endpoint::Direct { base }
    }

    pub fn proxied(proxy: Url, target: AirTarget) -> Self {
        Endpoint::Proxied { proxy, target }
    }

    pub fn list_url(&self) -> Result<Url, ClientError> {
        self.resource_url(FILES_PATH)
    }

    pub fn job_url(&self, job_id: JobId) -> Result<Url, ClientError> {
        self.resource_url(&format!("{FILES_PATH}/{job_id}"))
    }

    /// Server-push stream; only a direct endpoint offers one.
    pub fn push_url(&self) -> Result<Url, ClientError> {
        match self {
            Endpoint::Direct { base } => join_segment(base, PUSH_PATH),
            Endpoint::Proxied { .. } => Err(ClientError::InvalidEndpoint(
                "push is not available through the proxy".to_string(),
            )),
        }
    }

    fn resource_url(&self, path: &str) -> Result<Url, ClientError> {
        match self {
            Endpoint::Direct { base } => {
                let mut url = base.clone();
                {
                    let mut segments = url.path_segments_mut().map_err(|_| {
                        ClientError::InvalidEndpoint(format!("{base} cannot carry a path"))
                    })?;
                    segments.pop_if_empty();
                    for segment in path.split('/') {
                        segments.push(segment);
                    }
                }
                Ok(url)
            }
            Endpoint::Proxied { proxy, target } => {
                if target.is_empty() {
                    return Err(ClientError::InvalidEndpoint("empty Air host".to_string()));
                }
                let mut url = join_segment(proxy, PROXY_PATH)?;
                url.query_pairs_mut()
                    .clear()
                    .append_pair("target", &target.to_string())
                    .append_pair("path", path);
                Ok(url)
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Direct { base } => write!(f, "{base}"),
            Endpoint::Proxied { proxy, target } => write!(f, "{target} via {proxy}"),
        }
    }
}

pub fn userinfo_url(proxy: &Url) -> Result<Url, ClientError> {
    join_segment(proxy, USERINFO_PATH)
}

/// Accepts only http(s) bases; anything else cannot be polled.
pub fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| ClientError::InvalidEndpoint(format!("{raw}: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::InvalidEndpoint(format!(
            "{raw}: unsupported scheme {other}"
        ))),
    }
}

fn join_segment(base: &Url, segment: &str) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidEndpoint(format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}
