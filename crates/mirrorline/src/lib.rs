//! # Mirrorline
//!
//! The unified API for Mirrorline: a client that keeps a local mirror of
//! server state consistent over a lossy push channel.
//!
//! ## Overview
//!
//! - **Channel**: envelopes, strict inbound validation, typed events,
//!   reconnect with backoff, one client per channel path
//! - **Sync**: handshake baselines, ordered push application, request
//!   coalescing, degraded mode with forced reconnects
//! - **Polling**: an out-of-band refresh loop while pushes cannot be trusted
//! - **Session**: all of the above wired from one [`MirrorlineConfig`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirrorline::{MirrorlineConfig, Session};
//! use mirrorline::channel::{JsonObject, Transport};
//! use mirrorline::sync::{ApplyContext, SnapshotApplier};
//!
//! struct Store;
//!
//! impl SnapshotApplier for Store {
//!     fn apply_snapshot(&self, snapshot: &JsonObject, _ctx: &ApplyContext) -> bool {
//!         !snapshot.is_empty()
//!     }
//! }
//!
//! async fn example(transport: Arc<dyn Transport>) -> mirrorline::Result<()> {
//!     let config = MirrorlineConfig::from_file("mirrorline.json")?;
//!     mirrorline::logging::init(&config.log_filter)?;
//!
//!     let session = Session::builder(config, transport, Arc::new(Store)).build();
//!     let mode = session.connect_and_sync().await?;
//!     println!("sync mode: {mode}");
//!
//!     session.switch_context("task-42").await?;
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `mirrorline::channel` - channel client, envelopes, transport trait
//! - `mirrorline::sync` - sync coordinator and collaborator traits

pub mod config;
pub mod error;
pub mod logging;
pub mod polling;
pub mod session;

// Re-export component crates
pub use mirrorline_channel as channel;
pub use mirrorline_sync as sync;

// Re-export main types for convenience
pub use config::{MirrorlineConfig, DEFAULT_LOG_FILTER};
pub use error::{MirrorlineError, Result};
pub use polling::{PollingConfig, PollingDriver, RefreshError, Refresher};
pub use session::{Session, SessionBuilder};

pub use mirrorline_channel::{ChannelClient, ChannelConfig, EventKind, Transport};
pub use mirrorline_sync::{Coordinator, SnapshotApplier, SyncConfig, SyncMode, SyncStateView};
