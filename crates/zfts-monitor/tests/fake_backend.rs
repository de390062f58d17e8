use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use futures_util::stream;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use zfts_core::{Backend, HealthState, JobCommand, TableView};
use zfts_monitor::endpoint::{parse_base_url, userinfo_url};
use zfts_monitor::probe::{ProbeLoops, ProbeSettings};
use zfts_monitor::push::run_push;
use zfts_monitor::{
    AirTarget, ClientError, Endpoint, Monitor, MonitorConfig, MonitorEvent, SnapshotSource,
    TransferClient,
};

#[derive(Default)]
struct FakeState {
    commands: Vec<(String, Value)>,
    proxy_targets: Vec<String>,
}

type Shared = Arc<Mutex<FakeState>>;

fn ground_document() -> Value {
    json!({
        "platform_name": "ZF-7",
        "status": [
            {
                "fileID": 3,
                "file_name": "pass-003.raw",
                "started": 0,
                "percent_complete": 0.0,
                "rate": 0,
                "bytes_received": 0,
                "file_size": 1000,
                "priority": 2
            },
            {
                "fileID": "4",
                "file_name": "pass-004.raw",
                "started": "1",
                "percent_complete": 50.5,
                "rate": { "parsedValue": "2500" },
                "bytes_received": 500,
                "file_size": 1000,
                "priority": 5
            }
        ]
    })
}

fn air_document() -> Value {
    json!([
        {
            "fileID": 3,
            "file_name": "air-003.raw",
            "started": 1,
            "percent_complete": 10.0,
            "rate": 100,
            "bytes_received": 100,
            "file_size": 1000,
            "priority": 1
        }
    ])
}

async fn ground_list() -> Json<Value> {
    Json(ground_document())
}

async fn ground_command(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Ok(mut state) = state.lock() {
        state.commands.push((format!("ground/{id}"), body));
    }
    StatusCode::OK
}

async fn proxy_list(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    if params.get("path").map(String::as_str) != Some("files") {
        return Err(StatusCode::NOT_FOUND);
    }
    if let Ok(mut state) = state.lock() {
        state
            .proxy_targets
            .push(params.get("target").cloned().unwrap_or_default());
    }
    Ok(Json(air_document()))
}

async fn proxy_command(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let path = params.get("path").cloned().unwrap_or_default();
    if let Ok(mut state) = state.lock() {
        state.commands.push((format!("air/{path}"), body));
    }
    StatusCode::OK
}

async fn slow_list() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!([]))
}

async fn broken_list() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn ground_push() -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let events = vec![
        Ok(Event::default().comment("keepalive")),
        Ok(Event::default()
            .event("status")
            .data(ground_document().to_string())),
        Ok(Event::default().event("other").data("ignored")),
    ];
    Sse::new(stream::iter(events))
}

async fn userinfo() -> Json<Value> {
    Json(json!({ "cn": "smith.john.q.1234567890", "dn": "CN=smith.john.q.1234567890,OU=ops" }))
}

async fn spawn_backend() -> (SocketAddr, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/api/files", get(ground_list))
        .route("/api/files/:id", axum::routing::post(ground_command))
        .route("/api/files.sse", get(ground_push))
        .route("/airproxy", get(proxy_list).post(proxy_command))
        .route("/slow/files", get(slow_list))
        .route("/broken/files", get(broken_list))
        .route("/userinfo", get(userinfo))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn base(addr: SocketAddr, path: &str) -> Url {
    parse_base_url(&format!("http://{addr}{path}")).unwrap()
}

async fn next_event(rx: &mut mpsc::Receiver<MonitorEvent>) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("channel open")
}

#[tokio::test]
async fn wrapped_snapshot_is_normalized() {
    let (addr, _) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let url = Endpoint::direct(base(addr, "/api")).list_url().unwrap();

    let snapshot = client.fetch_snapshot(&url).await.unwrap();
    assert_eq!(snapshot.platform_name.as_deref(), Some("ZF-7"));
    assert_eq!(snapshot.status.len(), 2);
    assert!(!snapshot.status[0].started);
    assert!(snapshot.status[1].started);
    assert_eq!(snapshot.status[1].id, 4);
    assert_eq!(snapshot.status[1].rate, 2500.0);
}

#[tokio::test]
async fn proxied_bare_array_carries_target() {
    let (addr, state) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let endpoint = Endpoint::proxied(base(addr, ""), AirTarget::new("air-node", 19712));

    let snapshot = client.fetch_snapshot(&endpoint.list_url().unwrap()).await.unwrap();
    assert_eq!(snapshot.platform_name, None);
    assert_eq!(snapshot.status.len(), 1);
    assert_eq!(
        state.lock().unwrap().proxy_targets,
        vec!["air-node:19712".to_string()]
    );
}

#[tokio::test]
async fn command_bodies_use_string_flags() {
    let (addr, state) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let ground = Endpoint::direct(base(addr, "/api"));
    let air = Endpoint::proxied(base(addr, ""), AirTarget::new("air-node", 19712));

    client
        .send_command(&ground.job_url(5).unwrap(), JobCommand::Cancel)
        .await
        .unwrap();
    client
        .send_command(&ground.job_url(3).unwrap(), JobCommand::Start { priority: 4 })
        .await
        .unwrap();
    client
        .send_command(&air.job_url(3).unwrap(), JobCommand::Stop)
        .await
        .unwrap();

    let commands = state.lock().unwrap().commands.clone();
    assert_eq!(
        commands,
        vec![
            (
                "ground/5".to_string(),
                json!({ "started": "false", "cancel": "true" })
            ),
            (
                "ground/3".to_string(),
                json!({ "started": "true", "priority": 4 })
            ),
            (
                "air/files/3".to_string(),
                json!({ "started": "false", "cancel": "false" })
            ),
        ]
    );
}

#[tokio::test]
async fn non_success_status_is_a_transport_failure() {
    let (addr, _) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let url = Endpoint::direct(base(addr, "/broken")).list_url().unwrap();

    let err = client.fetch_snapshot(&url).await.unwrap_err();
    assert!(matches!(err, ClientError::Status(500)));
}

#[tokio::test]
async fn probe_hits_deadline() {
    let (addr, _) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let url = Endpoint::direct(base(addr, "/slow")).list_url().unwrap();

    let err = client
        .probe(&url, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ProbeTimeout(_)));

    let ok_url = Endpoint::direct(base(addr, "/api")).list_url().unwrap();
    assert!(client.probe(&ok_url, Duration::from_secs(2)).await.is_ok());
}

#[tokio::test]
async fn probe_loop_never_overlaps_probes() {
    let (addr, _) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let url = Endpoint::direct(base(addr, "/slow")).list_url().unwrap();
    let (tx, mut rx) = mpsc::channel(32);
    let mut probes = ProbeLoops::new();
    probes.start(
        Backend::Ground,
        0,
        ProbeSettings {
            interval: Duration::from_millis(100),
            deadline: Duration::from_secs(1),
        },
        url,
        client,
        tx,
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;
    probes.stop(Backend::Ground);

    let mut outcomes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let MonitorEvent::Probe { outcome, .. } = event {
            outcomes.push(outcome);
        }
    }
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(ClientError::ProbeTimeout(_))));
}

#[tokio::test]
async fn push_stream_delivers_status_snapshots() {
    let (addr, _) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let url = Endpoint::direct(base(addr, "/api")).push_url().unwrap();
    let (tx, mut rx) = mpsc::channel(32);
    let push = tokio::spawn(run_push(Backend::Ground, 0, url, client, tx));

    assert!(matches!(
        next_event(&mut rx).await,
        MonitorEvent::PushConnected { epoch: 0 }
    ));
    match next_event(&mut rx).await {
        MonitorEvent::Snapshot {
            backend,
            source,
            result,
            ..
        } => {
            assert_eq!(backend, Backend::Ground);
            assert_eq!(source, SnapshotSource::Push);
            assert_eq!(result.unwrap().status.len(), 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        next_event(&mut rx).await,
        MonitorEvent::PushClosed { epoch: 0, .. }
    ));
    push.abort();
}

#[tokio::test]
async fn user_info_resolves_display_name() {
    let (addr, _) = spawn_backend().await;
    let client = TransferClient::new().unwrap();
    let user = client
        .fetch_user_info(&userinfo_url(&base(addr, "")).unwrap())
        .await
        .unwrap();
    assert_eq!(user.display_name(), "John Smith");
}

fn monitor_config(addr: SocketAddr, state_dir: &std::path::Path) -> MonitorConfig {
    MonitorConfig {
        ground_url: base(addr, "/api"),
        proxy_url: base(addr, ""),
        air_target: None,
        ground_poll: Duration::from_secs(60),
        air_poll: Duration::from_secs(60),
        probe: ProbeSettings {
            interval: Duration::from_secs(60),
            deadline: Duration::from_secs(2),
        },
        push_enabled: false,
        state_dir: state_dir.to_path_buf(),
        auto_reconnect_delay: Duration::from_millis(600),
    }
}

#[tokio::test]
async fn monitor_renders_both_backends_and_sends_commands() {
    let (addr, state) = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    let mut monitor = Monitor::new(
        monitor_config(addr, dir.path()),
        TransferClient::new().unwrap(),
        tx,
    );
    monitor.start();

    while monitor.session(Backend::Ground).view().rows().is_empty() {
        let event = next_event(&mut rx).await;
        monitor.apply_event(event);
    }
    assert_eq!(
        monitor.session(Backend::Ground).view().platform_name(),
        Some("ZF-7")
    );

    monitor
        .connect_air(AirTarget::new("air-node", 19712))
        .unwrap();
    while monitor.session(Backend::Air).health().state() == HealthState::Connecting {
        let event = next_event(&mut rx).await;
        monitor.apply_event(event);
    }
    assert_eq!(
        monitor.session(Backend::Air).health().state(),
        HealthState::Live
    );
    assert!(matches!(
        monitor.session(Backend::Air).view(),
        TableView::Jobs { .. }
    ));
    assert_eq!(monitor.session(Backend::Air).view().rows()[0].job.id, 3);

    monitor
        .dispatch(Backend::Air, 3, zfts_core::Action::Stop, None)
        .unwrap();
    loop {
        let event = next_event(&mut rx).await;
        let done = matches!(event, MonitorEvent::CommandResult { .. });
        monitor.apply_event(event);
        if done {
            break;
        }
    }
    let commands = state.lock().unwrap().commands.clone();
    assert!(commands.contains(&(
        "air/files/3".to_string(),
        json!({ "started": "false", "cancel": "false" })
    )));
    assert_eq!(
        monitor.ledger().get(Backend::Air, 3),
        Some(zfts_core::PendingAction::Stopping)
    );
    monitor.shutdown();
}
