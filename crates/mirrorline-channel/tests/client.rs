//! Channel client behavior over the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mirrorline_channel::{
    Backoff, ChannelClient, ChannelConfig, ChannelError, ChannelFailure, ChannelRegistry,
    ConnectInfo, DisconnectInfo, EmitOptions, EnvelopeError, EventKind, TransportError,
};
use mirrorline_testkit::{delivery, ManualClock, ManualScheduler, MemoryTransport, StaticTokenProvider};
use parking_lot::Mutex;
use serde_json::json;

fn config() -> ChannelConfig {
    ChannelConfig::default().with_reconnect(Backoff::new(Duration::from_millis(500), Duration::from_secs(30)))
}

struct Rig {
    transport: Arc<MemoryTransport>,
    scheduler: Arc<ManualScheduler>,
    tokens: Arc<StaticTokenProvider>,
    client: ChannelClient,
}

fn rig_with(config: ChannelConfig) -> Rig {
    let transport = MemoryTransport::new();
    let scheduler = ManualScheduler::new(ManualClock::new());
    let tokens = Arc::new(StaticTokenProvider::new("tok"));
    let client = ChannelClient::builder(config, transport.clone())
        .token_provider(tokens.clone())
        .scheduler(scheduler.clone())
        .build();
    Rig {
        transport,
        scheduler,
        tokens,
        client,
    }
}

fn rig() -> Rig {
    rig_with(config())
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_round_trip_normalizes_reply() {
    let rig = rig();
    rig.transport.respond_with("echo", |env| {
        Ok(json!({ "results": [ { "ok": true, "handlerId": "echo", "data": env["data"].clone() } ] }))
    });
    rig.client.connect().await.unwrap();

    let reply = rig
        .client
        .request(
            &EventKind::custom("echo"),
            &json!({ "x": 1 }),
            EmitOptions::default().with_correlation_id("cid-1"),
        )
        .await
        .unwrap();

    assert_eq!(reply.correlation_id.as_deref(), Some("cid-1"));
    let first = reply.first_ok().unwrap();
    assert_eq!(first.data.as_ref().and_then(|d| d.get("x")), Some(&json!(1)));

    let calls = rig.transport.calls_for("echo");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["correlationId"], json!("cid-1"));
    assert!(calls[0]["ts"].is_string());
}

#[tokio::test]
async fn emit_carries_handler_filters() {
    let rig = rig();
    rig.client.connect().await.unwrap();

    let cid = rig
        .client
        .emit(
            &EventKind::custom("note"),
            &json!({ "text": "hi" }),
            EmitOptions::default()
                .with_correlation_prefix("note")
                .include_handlers(vec!["a".into()]),
        )
        .await
        .unwrap();

    assert!(cid.starts_with("note-"));
    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "note");
    assert_eq!(sent[0].1["includeHandlers"], json!(["a"]));
    assert!(sent[0].1.get("excludeHandlers").is_none());
}

#[tokio::test]
async fn contradictory_filters_are_rejected() {
    let rig = rig();
    rig.client.connect().await.unwrap();

    let err = rig
        .client
        .emit(
            &EventKind::custom("note"),
            &json!({}),
            EmitOptions::default()
                .include_handlers(vec!["a".into()])
                .exclude_handlers(vec!["b".into()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::InvalidOptions(_)));
    assert!(rig.transport.sent().is_empty());
}

#[tokio::test]
async fn emit_requires_connection() {
    let rig = rig();
    let err = rig
        .client
        .emit(&EventKind::custom("note"), &json!({}), EmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::NotConnected { .. }));
    assert!(err.is_transport());
}

#[tokio::test]
async fn oversized_payload_never_reaches_transport() {
    let rig = rig_with(config().with_max_payload_bytes(128));
    rig.client.connect().await.unwrap();

    let big = "x".repeat(512);
    let err = rig
        .client
        .emit(&EventKind::custom("blob"), &json!({ "body": big }), EmitOptions::default())
        .await
        .unwrap_err();

    match err {
        ChannelError::PayloadTooLarge { size, limit } => {
            assert_eq!(limit, 128);
            assert!(size > 512);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(rig.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn request_times_out_without_reply() {
    let rig = rig();
    rig.client.connect().await.unwrap();

    let err = rig
        .client
        .request(
            &EventKind::custom("slow"),
            &json!({}),
            EmitOptions::default().with_timeout(Duration::from_millis(250)),
        )
        .await
        .unwrap_err();

    match err {
        ChannelError::Timeout { event, after } => {
            assert_eq!(event, "slow");
            assert_eq!(after, Duration::from_millis(250));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn listener_attached_once_and_detached_with_last_subscriber() {
    let rig = rig();
    rig.client.connect().await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let a = rig.client.on(EventKind::StatePush, {
        let hits = Arc::clone(&hits);
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    });
    let b = rig.client.on(EventKind::StatePush, {
        let hits = Arc::clone(&hits);
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(rig.transport.listen_count("state_push"), 1);
    assert_eq!(rig.client.subscriber_count(&EventKind::StatePush), 2);

    assert!(rig.transport.push("state_push", delivery("e-1", json!({ "n": 1 }))));
    rig.transport.wait_until(|_| hits.load(Ordering::SeqCst) == 2).await;

    assert!(rig.client.off(&EventKind::StatePush, a));
    assert!(rig.transport.is_listening("state_push"));
    assert!(!rig.client.off(&EventKind::StatePush, a));
    assert!(rig.client.off(&EventKind::StatePush, b));
    assert!(!rig.transport.is_listening("state_push"));
}

#[tokio::test]
async fn invalid_delivery_goes_to_error_hook() {
    let rig = rig();
    let failures = Arc::new(Mutex::new(Vec::new()));
    rig.client.on_error({
        let failures = Arc::clone(&failures);
        move |f| failures.lock().push(f.clone())
    });
    let hits = Arc::new(AtomicUsize::new(0));
    rig.client.on(EventKind::StatePush, {
        let hits = Arc::clone(&hits);
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut bad = delivery("e-1", json!({}));
    bad["handlerId"] = json!("  ");
    assert_eq!(rig.client.deliver("state_push", &bad), 0);

    let mut array_data = delivery("e-2", json!({}));
    array_data["data"] = json!([1]);
    assert_eq!(rig.client.deliver("state_push", &array_data), 0);

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(
        failures.lock().clone(),
        vec![
            ChannelFailure::InvalidDelivery {
                event: EventKind::StatePush,
                error: EnvelopeError::MissingField("handlerId"),
            },
            ChannelFailure::InvalidDelivery {
                event: EventKind::StatePush,
                error: EnvelopeError::NonObjectData,
            },
        ]
    );
}

#[tokio::test]
async fn null_data_is_delivered_as_empty_object() {
    let rig = rig();
    let seen = Arc::new(Mutex::new(None));
    rig.client.on(EventKind::custom("tick"), {
        let seen = Arc::clone(&seen);
        move |d| *seen.lock() = Some(d.data.clone())
    });

    let mut raw = delivery("e-1", json!(null));
    raw["ts"] = json!(1_700_000_000_000i64);
    assert_eq!(rig.client.deliver("tick", &raw), 1);
    assert_eq!(seen.lock().as_ref().map(|d| d.is_empty()), Some(true));
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let rig = rig();
    let (a, b) = tokio::join!(rig.client.connect(), rig.client.connect());
    a.unwrap();
    b.unwrap();
    assert_eq!(rig.transport.opens(), 1);
    assert!(rig.client.is_connected());

    rig.client.connect().await.unwrap();
    assert_eq!(rig.transport.opens(), 1);
}

#[tokio::test]
async fn token_failure_connects_without_token() {
    let rig = rig();
    rig.tokens.set_failing(true);
    rig.client.connect().await.unwrap();
    assert_eq!(rig.transport.tokens_seen(), vec![None]);

    rig.client.disconnect().await;
    rig.tokens.set_failing(false);
    rig.client.connect().await.unwrap();
    assert_eq!(rig.transport.tokens_seen()[1].as_deref(), Some("tok-0"));
}

#[tokio::test]
async fn lost_link_reconnects_with_backoff() {
    let rig = rig();
    rig.client.connect().await.unwrap();

    rig.transport.drop_link("server went away");
    rig.transport.wait_until(|_| !rig.client.is_connected()).await;
    assert!(rig.client.reconnect_pending());
    assert_eq!(rig.scheduler.pending_delays(), vec![Duration::from_millis(500)]);

    rig.transport.fail_next_open(TransportError::Refused("busy".into()));
    assert_eq!(rig.scheduler.advance(Duration::from_millis(500)).await, 1);
    assert_eq!(rig.transport.opens(), 2);
    assert!(!rig.client.is_connected());
    assert_eq!(rig.scheduler.pending_delays(), vec![Duration::from_secs(1)]);

    rig.scheduler.advance(Duration::from_secs(1)).await;
    assert_eq!(rig.transport.opens(), 3);
    assert!(rig.client.is_connected());
    assert!(!rig.client.reconnect_pending());
}

#[tokio::test]
async fn token_invalidated_once_per_error_burst() {
    let rig = rig();
    rig.client.connect().await.unwrap();

    rig.transport.drop_link("reset");
    rig.transport.wait_until(|_| !rig.client.is_connected()).await;
    rig.transport.fail_next_open(TransportError::Refused("busy".into()));
    rig.scheduler.advance(Duration::from_millis(500)).await;
    assert_eq!(rig.tokens.invalidations(), 1);

    rig.scheduler.advance(Duration::from_secs(1)).await;
    assert!(rig.client.is_connected());
    assert_eq!(rig.transport.tokens_seen().last().cloned().flatten().as_deref(), Some("tok-1"));

    rig.transport.drop_link("reset again");
    rig.transport.wait_until(|_| !rig.client.is_connected()).await;
    assert_eq!(rig.tokens.invalidations(), 2);
}

#[tokio::test]
async fn connect_hooks_report_identity_changes() {
    let rig = rig();
    let infos: Arc<Mutex<Vec<ConnectInfo>>> = Arc::default();
    rig.client.on_connect({
        let infos = Arc::clone(&infos);
        move |info| infos.lock().push(info.clone())
    });

    rig.transport.set_server_identity("srv-1");
    rig.client.connect().await.unwrap();

    rig.transport.drop_link("restart");
    rig.transport.wait_until(|_| !rig.client.is_connected()).await;
    rig.transport.set_server_identity("srv-2");
    rig.scheduler.advance(Duration::from_millis(500)).await;

    let infos = infos.lock().clone();
    assert_eq!(infos.len(), 2);
    assert!(infos[0].first_connect);
    assert!(!infos[0].server_identity_changed);
    assert!(!infos[1].first_connect);
    assert!(infos[1].server_identity_changed);
    assert_eq!(infos[1].server_identity.as_deref(), Some("srv-2"));
}

#[tokio::test]
async fn manual_disconnect_suppresses_reconnect() {
    let rig = rig();
    let infos: Arc<Mutex<Vec<DisconnectInfo>>> = Arc::default();
    rig.client.on_disconnect({
        let infos = Arc::clone(&infos);
        move |info| infos.lock().push(info.clone())
    });

    rig.client.connect().await.unwrap();
    rig.client.disconnect().await;

    assert!(!rig.client.is_connected());
    assert_eq!(rig.transport.closes(), 1);
    assert_eq!(rig.scheduler.pending(), 0);
    let infos = infos.lock().clone();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].client_initiated);
}

#[tokio::test]
async fn auto_reconnect_can_be_disabled() {
    let rig = rig_with(config().with_auto_reconnect(false));
    rig.client.connect().await.unwrap();
    rig.transport.drop_link("gone");
    rig.transport.wait_until(|_| !rig.client.is_connected()).await;
    assert_eq!(rig.scheduler.pending(), 0);
}

#[tokio::test]
async fn registry_keeps_one_client_per_path() {
    let registry = ChannelRegistry::new();
    let transport = MemoryTransport::new();
    let first = registry.get_or_insert_with("/ws/state", || {
        ChannelClient::builder(config(), transport.clone()).build()
    });
    let second = registry.get_or_insert_with("/ws/state", || panic!("client constructed twice"));

    first.connect().await.unwrap();
    assert!(second.is_connected());
    assert_eq!(registry.len(), 1);
    assert!(registry.remove("/ws/state").is_some());
    assert!(registry.is_empty());
}
