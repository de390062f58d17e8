//! Async runtime around `zfts-core`: HTTP transport, poll and probe loops, the optional push
//! stream and the single-owner [`engine::Monitor`] that applies their results.

pub mod client;
pub mod endpoint;
pub mod engine;
pub mod logging;
pub mod probe;
pub mod push;
pub mod scheduler;
pub mod settings;

pub use client::{ClientError, TransferClient};
pub use endpoint::{AirTarget, Endpoint, DEFAULT_AIR_PORT};
pub use engine::{BackendSession, Monitor, MonitorEvent, SnapshotSource};
pub use settings::{MonitorConfig, SettingsError};
