//! Session wiring, configuration files and logging setup.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use mirrorline::channel::{ChannelConfig, ChannelRegistry};
use mirrorline::sync::SyncMode;
use mirrorline::{MirrorlineConfig, MirrorlineError, Session};
use mirrorline_testkit::{handshake_ok, MemoryTransport, RecordingApplier, RecordingObserver};
use tempfile::NamedTempFile;

const STATE_REQUEST: &str = "state_request";

fn config_for(path: &str) -> MirrorlineConfig {
    MirrorlineConfig {
        channel: ChannelConfig::new(path),
        ..MirrorlineConfig::default()
    }
}

fn leaked_registry() -> &'static ChannelRegistry {
    Box::leak(Box::new(ChannelRegistry::new()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_connects_and_syncs() {
    let transport = MemoryTransport::new();
    transport.respond_with(STATE_REQUEST, |_| Ok(handshake_ok("e1", 3)));
    let observer = Arc::new(RecordingObserver::new());
    let registry = leaked_registry();

    let session = Session::builder(config_for("/ws/session-sync"), transport.clone(), Arc::new(RecordingApplier::new()))
        .observer(observer.clone())
        .registry(registry)
        .build();

    assert_eq!(session.connect_and_sync().await.unwrap(), SyncMode::Healthy);
    assert!(transport.is_open());
    assert_eq!(session.state().runtime_epoch.as_deref(), Some("e1"));
    assert_eq!(observer.modes().last(), Some(&SyncMode::Healthy));
    assert!(!session.is_polling());

    let baseline = session.switch_context("ctx-2").await.unwrap();
    assert_eq!(baseline.seq_base, 3);
    assert_eq!(session.state().context_id.as_deref(), Some("ctx-2"));
    let last = transport.calls_for(STATE_REQUEST).pop().unwrap();
    assert_eq!(last["data"]["context_id"], "ctx-2");

    assert!(registry.get("/ws/session-sync").is_some());
    session.shutdown().await;
    assert!(!transport.is_open());
    assert!(registry.get("/ws/session-sync").is_none());
}

#[tokio::test]
async fn sessions_share_the_channel_for_a_path() {
    let first = MemoryTransport::new();
    let second = MemoryTransport::new();
    first.respond_with(STATE_REQUEST, |_| Ok(handshake_ok("e1", 0)));
    let registry = leaked_registry();

    let a = Session::builder(config_for("/ws/shared"), first.clone(), Arc::new(RecordingApplier::new()))
        .registry(registry)
        .build();
    let b = Session::builder(config_for("/ws/shared"), second.clone(), Arc::new(RecordingApplier::new()))
        .registry(registry)
        .build();

    a.connect().await.unwrap();
    assert!(b.channel().is_connected());
    assert_eq!(first.opens(), 1);
    assert_eq!(second.opens(), 0);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn failed_sync_reports_handshake_error() {
    let transport = MemoryTransport::new();
    let session = Session::builder(config_for("/ws/session-offline"), transport, Arc::new(RecordingApplier::new()))
        .registry(leaked_registry())
        .build();

    let err = session.sync(true).await.unwrap_err();
    assert!(matches!(err, MirrorlineError::Handshake(_)));
    assert_eq!(session.mode(), SyncMode::Disconnected);
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration files
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn config_loads_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "channel": {{ "path": "/ws/board", "request_timeout_ms": 15000 }},
            "sync": {{ "timezone": "Europe/Oslo", "failure_threshold": 5 }},
            "polling": {{ "interval_ms": 3000, "enabled": false }},
            "log_filter": "mirrorline=debug"
        }}"#
    )
    .unwrap();

    let config = MirrorlineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.channel.path, "/ws/board");
    assert_eq!(config.channel.request_timeout, Duration::from_secs(15));
    assert_eq!(config.sync.timezone.as_deref(), Some("Europe/Oslo"));
    assert_eq!(config.sync.failure_threshold, 5);
    assert_eq!(config.polling.interval, Duration::from_secs(3));
    assert!(!config.polling.enabled);
    assert_eq!(config.log_filter, "mirrorline=debug");
}

#[test]
fn missing_config_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let err = MirrorlineConfig::from_file(&path).unwrap_err();
    match &err {
        MirrorlineError::Config { path: Some(p), .. } => assert_eq!(p, &path),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("absent.json"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn logging_installs_once() {
    let _ = mirrorline::logging::init("info");
    let err = mirrorline::logging::init("info").unwrap_err();
    assert!(matches!(err, MirrorlineError::Logging(_)));
}
