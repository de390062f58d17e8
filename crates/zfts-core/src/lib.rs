pub mod dispatch;
pub mod format;
pub mod health;
pub mod ledger;
pub mod reconcile;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

pub use dispatch::{Action, ActionDispatcher, DispatchPlan, Rejection};
pub use health::{HealthMonitor, HealthState, HealthTransition, ProbeFailure};
pub use ledger::{LedgerKey, PendingAction, PendingActionLedger};
pub use reconcile::{
    ButtonState, ButtonStates, DisplayState, JobRow, Reconciler, Reconciliation, TableView,
};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;

/// Job identity, unique within one backend's namespace only.
pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ground,
    Air,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Ground, Backend::Air];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Ground => "Ground",
            Backend::Air => "Air",
        }
    }

    pub fn other(&self) -> Backend {
        match self {
            Backend::Ground => Backend::Air,
            Backend::Air => Backend::Ground,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a backend's job list. Replaced wholesale on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferJob {
    #[serde(rename = "fileID", deserialize_with = "deserialize_job_id")]
    pub id: JobId,
    #[serde(default)]
    pub file_name: String,
    #[serde(
        default,
        deserialize_with = "deserialize_started",
        serialize_with = "serialize_started"
    )]
    pub started: bool,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub percent_complete: f64,
    #[serde(default, deserialize_with = "deserialize_rate")]
    pub rate: f64,
    #[serde(default, deserialize_with = "deserialize_lenient_u64")]
    pub bytes_received: u64,
    #[serde(default, deserialize_with = "deserialize_lenient_u64")]
    pub file_size: u64,
    #[serde(default = "default_priority", deserialize_with = "deserialize_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    MIN_PRIORITY
}

/// An authoritative job-list payload from one poll or push event.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Snapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
    pub status: Vec<TransferJob>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    Bare(Vec<TransferJob>),
    Wrapped {
        #[serde(default)]
        platform_name: Option<String>,
        #[serde(default)]
        status: Option<Vec<TransferJob>>,
    },
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match SnapshotDocument::deserialize(deserializer)? {
            SnapshotDocument::Bare(status) => Ok(Snapshot {
                platform_name: None,
                status,
            }),
            SnapshotDocument::Wrapped {
                platform_name,
                status,
            } => Ok(Snapshot {
                platform_name: platform_name.filter(|name| !name.trim().is_empty()),
                status: status.unwrap_or_default(),
            }),
        }
    }
}

impl Snapshot {
    pub fn job_ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.status.iter().map(|job| job.id)
    }
}

/// Parses a poll body or push event payload. Both transports go through here so the
/// reconciler always sees the same input shape.
pub fn parse_snapshot(raw: &str) -> Result<Snapshot, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Command the backend understands on `POST <endpoint>/<jobId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    Start { priority: u8 },
    Stop,
    Cancel,
    SetPriority { priority: u8 },
}

impl JobCommand {
    pub fn name(&self) -> &'static str {
        match self {
            JobCommand::Start { .. } => "start",
            JobCommand::Stop => "stop",
            JobCommand::Cancel => "cancel",
            JobCommand::SetPriority { .. } => "set_priority",
        }
    }

    pub fn body(&self) -> CommandBody {
        match *self {
            JobCommand::Start { priority } | JobCommand::SetPriority { priority } => CommandBody {
                started: true,
                priority: Some(priority),
                cancel: None,
            },
            JobCommand::Stop => CommandBody {
                started: false,
                priority: None,
                cancel: Some(false),
            },
            JobCommand::Cancel => CommandBody {
                started: false,
                priority: None,
                cancel: Some(true),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBody {
    #[serde(serialize_with = "serialize_flag", deserialize_with = "deserialize_flag")]
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_flag",
        deserialize_with = "deserialize_optional_flag"
    )]
    pub cancel: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub cn: Option<String>,
    #[serde(default)]
    pub dn: Option<String>,
}

pub const UNKNOWN_USER: &str = "Unknown User";

impl UserInfo {
    /// `smith.john.1234567` renders as `John Smith`.
    pub fn display_name(&self) -> String {
        let cn = self.cn.as_deref().unwrap_or("").trim();
        let clean = strip_numeric_suffix(cn);
        let parts: Vec<&str> = clean
            .split('.')
            .filter(|part| !part.is_empty() && !part.chars().all(|ch| ch.is_ascii_digit()))
            .collect();
        let display = if parts.len() >= 2 {
            format!("{} {}", capitalize(parts[1]), capitalize(parts[0]))
        } else {
            clean.to_string()
        };
        if display.is_empty() {
            UNKNOWN_USER.to_string()
        } else {
            display
        }
    }
}

fn strip_numeric_suffix(input: &str) -> &str {
    match input.rsplit_once('.') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|ch| ch.is_ascii_digit()) => {
            head
        }
        _ => input,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Deserialize an ID that can be either a number or a numeric string
fn deserialize_job_id<'de, D>(deserializer: D) -> Result<JobId, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match &val {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid fileID: {n}"))),
        Value::String(s) => s.trim().parse::<JobId>().map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected string or number for fileID")),
    }
}

/// The wire flag is numeric 0/1 but older services send strings or booleans.
fn deserialize_started<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match &val {
        Value::Bool(b) => *b,
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => true,
        other => value_as_f64(other) == Some(1.0),
    })
}

fn serialize_started<S>(started: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(u8::from(*started))
}

fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&val).unwrap_or(0.0))
}

fn deserialize_lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    if let Some(n) = val.as_u64() {
        return Ok(n);
    }
    Ok(value_as_f64(&val)
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n as u64)
        .unwrap_or(0))
}

/// Rate arrives either plain or wrapped as `{ "parsedValue": ... }`.
fn deserialize_rate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    let rate = match &val {
        Value::Object(map) => map.get("parsedValue").and_then(value_as_f64),
        other => value_as_f64(other),
    };
    Ok(rate.unwrap_or(0.0))
}

fn deserialize_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    let priority = value_as_f64(&val)
        .filter(|n| n.is_finite())
        .map(|n| n.round().clamp(f64::from(MIN_PRIORITY), f64::from(MAX_PRIORITY)) as u8)
        .unwrap_or(MIN_PRIORITY);
    Ok(priority)
}

fn serialize_flag<S>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(if *flag { "true" } else { "false" })
}

fn serialize_optional_flag<S>(flag: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match flag {
        Some(flag) => serialize_flag(flag, serializer),
        None => serializer.serialize_none(),
    }
}

fn parse_flag(val: &Value) -> Option<bool> {
    match val {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|n| n == 1),
        _ => None,
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    parse_flag(&val).ok_or_else(|| serde::de::Error::custom(format!("invalid flag: {val}")))
}

fn deserialize_optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    if val.is_null() {
        return Ok(None);
    }
    parse_flag(&val)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid flag: {val}")))
}
