//! # Mirrorline Testkit
//!
//! Testing utilities for Mirrorline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **MemoryTransport**: an in-memory [`Transport`](mirrorline_channel::Transport)
//!   with scripted, computed or parked replies and injectable deliveries
//! - **ManualClock / ManualScheduler**: deterministic time for backoff,
//!   failure windows and cooldowns
//! - **Recorders**: applier, notifier, observer and token provider that
//!   record what they see
//! - **Generators**: Proptest strategies for envelopes and requests
//! - **Fixtures**: wire payload builders and a wired [`SyncHarness`]
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use mirrorline_testkit::SyncHarness;
//!
//! let h = SyncHarness::new();
//! h.connect_healthy("epoch-1", 10).await;
//! h.push("epoch-1", 11);
//! assert_eq!(h.coordinator.state().last_seq, 11);
//! ```

pub mod clock;
pub mod fixtures;
pub mod generators;
pub mod recorders;
pub mod transport;

pub use clock::{ManualClock, ManualScheduler};
pub use fixtures::{
    delivery, handshake_ok, handshake_rejected, handshake_with_snapshot, harness_sync_config, object,
    push_data, SyncHarness,
};
pub use recorders::{NoticeEvent, RecordingApplier, RecordingNotifier, RecordingObserver, StaticTokenProvider};
pub use transport::{MemoryTransport, Responder};
