use crate::client::ClientError;
use crate::endpoint::{parse_base_url, AirTarget};
use crate::probe::{ProbeSettings, DEFAULT_PROBE_DEADLINE, DEFAULT_PROBE_INTERVAL};
use crate::scheduler::DEFAULT_POLL_INTERVAL;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_GROUND_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8080";
pub const AUTO_RECONNECT_DELAY: Duration = Duration::from_millis(600);

const AIR_TARGET_FILE: &str = "air_target.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] io::Error),
    #[error("settings parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("settings serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Endpoint(#[from] ClientError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub ground_url: Url,
    pub proxy_url: Url,
    /// Target to connect to shortly after start-up, if any.
    pub air_target: Option<AirTarget>,
    pub ground_poll: Duration,
    pub air_poll: Duration,
    pub probe: ProbeSettings,
    pub push_enabled: bool,
    pub state_dir: PathBuf,
    pub auto_reconnect_delay: Duration,
}

impl MonitorConfig {
    /// Defaults overlaid with the `ZFTS_*` environment. The remembered Air target is read from
    /// the state directory.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::load(resolve_state_dir())
    }

    /// Same as [`MonitorConfig::from_env`] with an explicit state directory. An unreadable
    /// remembered target is treated as absent.
    pub fn load(state_dir: PathBuf) -> Result<Self, SettingsError> {
        let air_target = load_air_target(&air_target_path(&state_dir)).unwrap_or(None);
        Ok(Self {
            ground_url: parse_base_url(&resolve_ground_url())?,
            proxy_url: parse_base_url(&resolve_proxy_url())?,
            air_target,
            ground_poll: DEFAULT_POLL_INTERVAL,
            air_poll: DEFAULT_POLL_INTERVAL,
            probe: ProbeSettings {
                interval: DEFAULT_PROBE_INTERVAL,
                deadline: DEFAULT_PROBE_DEADLINE,
            },
            push_enabled: resolve_push_enabled(),
            state_dir,
            auto_reconnect_delay: AUTO_RECONNECT_DELAY,
        })
    }

    pub fn air_target_path(&self) -> PathBuf {
        air_target_path(&self.state_dir)
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn resolve_ground_url() -> String {
    non_blank_env("ZFTS_GROUND_URL").unwrap_or_else(|| DEFAULT_GROUND_URL.to_string())
}

pub fn resolve_proxy_url() -> String {
    non_blank_env("ZFTS_PROXY_URL").unwrap_or_else(|| DEFAULT_PROXY_URL.to_string())
}

pub fn resolve_push_enabled() -> bool {
    non_blank_env("ZFTS_PUSH_ENABLED")
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

pub fn resolve_state_dir() -> PathBuf {
    if let Some(value) = non_blank_env("ZFTS_STATE_DIR") {
        return PathBuf::from(value);
    }
    if let Some(value) = non_blank_env("XDG_STATE_HOME") {
        return PathBuf::from(value).join("zfts");
    }
    if let Some(value) = non_blank_env("HOME") {
        return PathBuf::from(value)
            .join(".local")
            .join("state")
            .join("zfts");
    }
    PathBuf::from(".zfts/state")
}

pub fn air_target_path(state_dir: &Path) -> PathBuf {
    state_dir.join(AIR_TARGET_FILE)
}

/// `Ok(None)` when nothing was remembered or the remembered host is blank.
pub fn load_air_target(path: &Path) -> Result<Option<AirTarget>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    let target: AirTarget = toml::from_str(&contents)?;
    if target.is_empty() {
        return Ok(None);
    }
    Ok(Some(AirTarget::new(target.host, target.port)))
}

pub fn save_air_target(path: &Path, target: &AirTarget) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(target)?;
    fs::write(path, contents)?;
    Ok(())
}
