//! Test fixtures and helpers.
//!
//! Wire payload builders plus [`SyncHarness`], a fully wired channel and
//! coordinator running on a [`MemoryTransport`] and a manual clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mirrorline_channel::event::{SERVER_RESTART, STATE_PUSH};
use mirrorline_channel::{generate_correlation_id, Backoff, ChannelClient, ChannelConfig, JsonObject};
use mirrorline_sync::{Coordinator, SyncConfig};
use serde_json::{json, Value};

use crate::clock::{ManualClock, ManualScheduler};
use crate::recorders::{RecordingApplier, RecordingNotifier, RecordingObserver, StaticTokenProvider};
use crate::transport::MemoryTransport;

/// Unwrap a JSON object literal.
pub fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A valid inbound delivery envelope carrying `data`.
pub fn delivery(event_id: &str, data: Value) -> Value {
    json!({
        "handlerId": "server",
        "eventId": event_id,
        "correlationId": generate_correlation_id(Some("srv")),
        "ts": Utc::now().to_rfc3339(),
        "data": data,
    })
}

/// Successful handshake reply establishing `(epoch, seq_base)`.
pub fn handshake_ok(epoch: &str, seq_base: u64) -> Value {
    json!({
        "results": [{
            "ok": true,
            "handlerId": "state",
            "data": { "runtime_epoch": epoch, "seq_base": seq_base },
        }]
    })
}

/// Successful handshake reply that also carries a snapshot.
pub fn handshake_with_snapshot(epoch: &str, seq_base: u64, snapshot: Value) -> Value {
    json!({
        "results": [{
            "ok": true,
            "handlerId": "state",
            "data": { "runtime_epoch": epoch, "seq_base": seq_base, "snapshot": snapshot },
        }]
    })
}

/// Handshake reply with `ok = false`.
pub fn handshake_rejected(code: &str) -> Value {
    json!({
        "results": [{
            "ok": false,
            "handlerId": "state",
            "error": { "code": code, "message": "rejected" },
        }]
    })
}

/// `state_push` data object.
pub fn push_data(epoch: &str, seq: u64, snapshot: Value) -> Value {
    json!({ "runtime_epoch": epoch, "seq": seq, "snapshot": snapshot })
}

fn jitter_free_channel_config() -> ChannelConfig {
    ChannelConfig::default()
        .with_reconnect(Backoff::new(Duration::from_millis(500), Duration::from_secs(30)))
}

/// Default sync parameters with a jitter-free one-second retry.
pub fn harness_sync_config() -> SyncConfig {
    SyncConfig::default().with_retry(Backoff::new(Duration::from_secs(1), Duration::from_secs(30)))
}

/// A channel and coordinator wired to in-memory collaborators.
pub struct SyncHarness {
    pub transport: Arc<MemoryTransport>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ManualScheduler>,
    pub tokens: Arc<StaticTokenProvider>,
    pub channel: ChannelClient,
    pub applier: Arc<RecordingApplier>,
    pub notifier: Arc<RecordingNotifier>,
    pub observer: Arc<RecordingObserver>,
    pub coordinator: Coordinator,
}

impl SyncHarness {
    pub fn new() -> Self {
        Self::with_config(harness_sync_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let transport = MemoryTransport::new();
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(Arc::clone(&clock));
        let tokens = Arc::new(StaticTokenProvider::new("tok"));
        let channel = ChannelClient::builder(jitter_free_channel_config(), transport.clone())
            .token_provider(tokens.clone())
            .scheduler(scheduler.clone())
            .build();

        let applier = Arc::new(RecordingApplier::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let observer = Arc::new(RecordingObserver::new());
        let coordinator = Coordinator::builder(channel.clone(), applier.clone())
            .config(config)
            .notifier(notifier.clone())
            .observer(observer.clone())
            .scheduler(scheduler.clone())
            .clock(clock.clone())
            .build();

        Self {
            transport,
            clock,
            scheduler,
            tokens,
            channel,
            applier,
            notifier,
            observer,
            coordinator,
        }
    }

    /// Connect the channel. The connect handshake is left to the test.
    pub async fn connect(&self) {
        self.channel.connect().await.expect("memory transport connect");
    }

    /// Connect and complete the first handshake with `(epoch, seq_base)`.
    ///
    /// Later handshakes park until released.
    pub async fn connect_healthy(&self, epoch: &str, seq_base: u64) {
        self.transport
            .reply_next(mirrorline_channel::event::STATE_REQUEST, Ok(handshake_ok(epoch, seq_base)));
        self.connect().await;
        self.coordinator.settled().await;
    }

    /// Deliver a `state_push` through the channel. Returns the callbacks run.
    pub fn push(&self, epoch: &str, seq: u64) -> usize {
        let payload = delivery("push", push_data(epoch, seq, json!({ "seq": seq })));
        self.channel.deliver(STATE_PUSH, &payload)
    }

    /// Deliver a raw `state_push` data object.
    pub fn push_raw(&self, data: Value) -> usize {
        self.channel.deliver(STATE_PUSH, &delivery("push", data))
    }

    /// Deliver a `server_restart` hint.
    pub fn announce_restart(&self, runtime_id: &str) -> usize {
        self.channel
            .deliver(SERVER_RESTART, &delivery("restart", json!({ "runtime_id": runtime_id })))
    }

    /// Handshake requests sent so far.
    pub fn handshakes(&self) -> Vec<Value> {
        self.transport.calls_for(mirrorline_channel::event::STATE_REQUEST)
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}
