//! # Mirrorline Sync
//!
//! Keeps a client's view of server state consistent on top of a
//! [`ChannelClient`](mirrorline_channel::ChannelClient).
//!
//! ## Overview
//!
//! The server publishes snapshots as a push stream stamped with a runtime
//! epoch and a per-channel sequence number. The [`Coordinator`]:
//!
//! - performs a `state_request` handshake on every connect, establishing a
//!   baseline `(runtime_epoch, seq_base)`;
//! - applies a push only when it is `Healthy`, the epoch matches and the
//!   sequence number is exactly one past the last applied;
//! - forces a full resync on any gap, epoch change or malformed push;
//! - coalesces concurrent handshake requests (one in flight, one queued);
//! - degrades on handshake failure, retries with backoff and forces a
//!   transport reconnect after repeated failures.
//!
//! Snapshot installation is delegated to a [`SnapshotApplier`]; user-facing
//! notices go to a [`Notifier`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirrorline_channel::{ChannelClient, ChannelConfig, JsonObject, Transport};
//! use mirrorline_sync::{ApplyContext, Coordinator, SnapshotApplier, SyncConfig};
//!
//! struct Store;
//!
//! impl SnapshotApplier for Store {
//!     fn apply_snapshot(&self, snapshot: &JsonObject, _ctx: &ApplyContext) -> bool {
//!         !snapshot.is_empty()
//!     }
//! }
//!
//! # async fn run(transport: Arc<dyn Transport>) {
//! let channel = ChannelClient::builder(ChannelConfig::default(), transport).build();
//! let coordinator = Coordinator::builder(channel.clone(), Arc::new(Store))
//!     .config(SyncConfig::default().with_timezone("UTC"))
//!     .build();
//!
//! channel.connect().await.unwrap();
//! coordinator.settled().await;
//! println!("mode: {}", coordinator.mode());
//! # }
//! ```

pub mod apply;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod state;

pub use apply::{
    ApplyContext, NoopNotifier, Notice, NoticeLevel, Notifier, SnapshotApplier, SnapshotSource,
    SyncObserver,
};
pub use config::{SyncConfig, DEFAULT_NOTICE_GROUP};
pub use coordinator::{Coordinator, CoordinatorBuilder, HandshakeOutcome, HandshakeTicket};
pub use error::{HandshakeFailure, Result, SyncError};
pub use messages::{restart_runtime_id, Baseline, PushParseError, ResumeCursors, StatePush, StateRequest};
pub use state::{SyncMode, SyncStateView};
