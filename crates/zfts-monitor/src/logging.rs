use crate::settings::parse_bool_flag;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "zfts-dashboard.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    File(PathBuf),
    Discarded,
}

/// Installs the global subscriber. A terminal UI owns stdout, so logs go to a file under
/// `state_dir` unless `ZFTS_LOG_STDOUT` is set.
pub fn init_logging(state_dir: &Path, debug: bool) -> LogTarget {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(resolve_log_level(debug)));
    let (writer, target) = if stdout_enabled() {
        (BoxMakeWriter::new(io::stdout), LogTarget::Stdout)
    } else {
        match open_log_file(state_dir) {
            Ok((file, path)) => (BoxMakeWriter::new(Mutex::new(file)), LogTarget::File(path)),
            Err(_) => (BoxMakeWriter::new(io::sink), LogTarget::Discarded),
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(matches!(target, LogTarget::Stdout))
        .with_writer(writer)
        .try_init();
    target
}

fn resolve_log_level(debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    std::env::var("ZFTS_LOG_LEVEL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn stdout_enabled() -> bool {
    std::env::var("ZFTS_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

fn open_log_file(state_dir: &Path) -> io::Result<(std::fs::File, PathBuf)> {
    std::fs::create_dir_all(state_dir)?;
    let path = state_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins_over_env_level() {
        assert_eq!(resolve_log_level(true), "debug");
    }

    #[test]
    fn log_file_is_created_under_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let (_file, path) = open_log_file(&state).unwrap();
        assert_eq!(path, state.join(LOG_FILE_NAME));
        assert!(path.exists());
    }
}
