mod app;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, path::PathBuf, time::Duration};
use tokio::sync::mpsc;
use tracing::info;
use zfts_monitor::{
    endpoint::parse_base_url,
    logging::init_logging,
    settings::resolve_state_dir,
    AirTarget, Monitor, MonitorConfig, TransferClient, DEFAULT_AIR_PORT,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser, Debug, Default)]
#[command(name = "zfts-dashboard")]
#[command(about = "Live view of Ground and Air file transfer queues", long_about = None)]
struct Args {
    /// Ground service base URL. Overrides ZFTS_GROUND_URL.
    #[arg(long)]
    ground_url: Option<String>,
    /// Base URL of the service that relays requests to Air. Overrides ZFTS_PROXY_URL.
    #[arg(long)]
    proxy_url: Option<String>,
    #[arg(long)]
    air_host: Option<String>,
    #[arg(long)]
    air_port: Option<u16>,
    #[arg(long)]
    ground_poll_secs: Option<u64>,
    #[arg(long)]
    air_poll_secs: Option<u64>,
    #[arg(long)]
    probe_secs: Option<u64>,
    #[arg(long)]
    probe_deadline_secs: Option<u64>,
    /// Subscribe to the Ground push stream instead of polling while it is up.
    #[arg(long)]
    push: bool,
    #[arg(long)]
    state_dir: Option<PathBuf>,
    #[arg(long)]
    debug: bool,
}

fn build_config(args: &Args) -> Result<MonitorConfig> {
    let state_dir = args.state_dir.clone().unwrap_or_else(resolve_state_dir);
    let mut config = MonitorConfig::load(state_dir).context("loading settings")?;
    if let Some(raw) = &args.ground_url {
        config.ground_url = parse_base_url(raw).context("--ground-url")?;
    }
    if let Some(raw) = &args.proxy_url {
        config.proxy_url = parse_base_url(raw).context("--proxy-url")?;
    }
    if let Some(host) = &args.air_host {
        let port = args
            .air_port
            .or_else(|| config.air_target.as_ref().map(|target| target.port))
            .unwrap_or(DEFAULT_AIR_PORT);
        let target = AirTarget::new(host.as_str(), port);
        config.air_target = (!target.is_empty()).then_some(target);
    } else if let (Some(port), Some(target)) = (args.air_port, config.air_target.as_mut()) {
        target.port = port;
    }
    if let Some(secs) = non_zero(args.ground_poll_secs) {
        config.ground_poll = Duration::from_secs(secs);
    }
    if let Some(secs) = non_zero(args.air_poll_secs) {
        config.air_poll = Duration::from_secs(secs);
    }
    if let Some(secs) = non_zero(args.probe_secs) {
        config.probe.interval = Duration::from_secs(secs);
    }
    if let Some(secs) = non_zero(args.probe_deadline_secs) {
        config.probe.deadline = Duration::from_secs(secs);
    }
    if args.push {
        config.push_enabled = true;
    }
    Ok(config)
}

fn non_zero(value: Option<u64>) -> Option<u64> {
    value.filter(|secs| *secs > 0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;
    let log_target = init_logging(&config.state_dir, args.debug);
    info!(
        event = "dashboard_start",
        ground_url = %config.ground_url,
        proxy_url = %config.proxy_url,
        push = config.push_enabled,
        log = ?log_target,
    );

    let client = TransferClient::new().context("building http client")?;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let initial_target = config.air_target.clone().unwrap_or_default();
    let mut monitor = Monitor::new(config, client, tx);
    let mut app = app::App::new(&initial_target);

    let mut terminal = setup_terminal()?;
    monitor.start();
    let result = run_app(&mut terminal, &mut app, &mut monitor, rx).await;
    monitor.shutdown();
    restore_terminal(&mut terminal)?;

    if let Err(err) = result {
        eprintln!("zfts-dashboard: {err}");
    }
    info!(event = "dashboard_exit");
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut app::App,
    monitor: &mut Monitor,
    mut rx: mpsc::Receiver<zfts_monitor::MonitorEvent>,
) -> Result<()> {
    let mut input = EventStream::new();
    loop {
        terminal.draw(|f| ui::render(f, app, monitor))?;
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                monitor.apply_event(event);
                // Drain whatever else is queued so a burst costs a single redraw.
                while let Ok(event) = rx.try_recv() {
                    monitor.apply_event(event);
                }
            }
            input_event = input.next() => {
                match input_event {
                    Some(Ok(Event::Key(key))) if key.kind != KeyEventKind::Release => {
                        app.handle_key(key, monitor);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }
        if app.should_quit() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_in(dir: &std::path::Path) -> Args {
        Args {
            state_dir: Some(dir.to_path_buf()),
            ..Args::default()
        }
    }

    #[test]
    fn zero_intervals_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_in(dir.path());
        args.ground_poll_secs = Some(0);
        args.probe_secs = Some(3);
        let config = build_config(&args).unwrap();
        assert_eq!(config.ground_poll, Duration::from_secs(5));
        assert_eq!(config.probe.interval, Duration::from_secs(3));
    }

    #[test]
    fn air_host_flag_sets_target_with_default_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_in(dir.path());
        args.air_host = Some(" air-node ".to_string());
        let config = build_config(&args).unwrap();
        assert_eq!(
            config.air_target,
            Some(AirTarget::new("air-node", DEFAULT_AIR_PORT))
        );
    }

    #[test]
    fn blank_air_host_flag_clears_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_in(dir.path());
        args.air_host = Some("   ".to_string());
        let config = build_config(&args).unwrap();
        assert_eq!(config.air_target, None);
    }

    #[test]
    fn invalid_ground_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_in(dir.path());
        args.ground_url = Some("ftp://ground".to_string());
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::try_parse_from([
            "zfts-dashboard",
            "--air-host",
            "10.0.0.7",
            "--air-port",
            "20000",
            "--push",
        ])
        .unwrap();
        assert_eq!(args.air_host.as_deref(), Some("10.0.0.7"));
        assert_eq!(args.air_port, Some(20000));
        assert!(args.push);
    }
}
