//! Collaborators the coordinator drives: the snapshot applier, the notice
//! sink and the state observer.

use std::sync::atomic::{AtomicBool, Ordering};

use mirrorline_channel::JsonObject;

use crate::messages::ResumeCursors;
use crate::state::SyncStateView;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Handshake,
    Push,
    Poll,
}

/// Passed to [`SnapshotApplier::apply_snapshot`].
///
/// The applier calls [`request_resync`](Self::request_resync) when it finds
/// the snapshot internally inconsistent.
#[derive(Debug)]
pub struct ApplyContext {
    source: SnapshotSource,
    resync: AtomicBool,
}

impl ApplyContext {
    pub fn new(source: SnapshotSource) -> Self {
        Self {
            source,
            resync: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    /// Ask the coordinator for a forced full resync once this apply returns.
    pub fn request_resync(&self) {
        self.resync.store(true, Ordering::SeqCst);
    }

    pub fn resync_requested(&self) -> bool {
        self.resync.load(Ordering::SeqCst)
    }
}

/// Installs snapshots into the client's state store.
pub trait SnapshotApplier: Send + Sync {
    /// Apply one snapshot. Returns whether anything changed.
    fn apply_snapshot(&self, snapshot: &JsonObject, ctx: &ApplyContext) -> bool;

    /// Cursors for the next non-forced handshake.
    fn resume_cursors(&self) -> ResumeCursors {
        ResumeCursors::FULL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing status message. Notices sharing a group replace each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub group: String,
    pub level: NoticeLevel,
    pub message: String,
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
    /// Dismiss whatever notice is showing under `group`.
    fn clear(&self, group: &str);
}

/// Discards notices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notice: Notice) {}
    fn clear(&self, _group: &str) {}
}

/// Receives every state transition of the coordinator.
pub trait SyncObserver: Send + Sync {
    fn on_change(&self, state: &SyncStateView);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resync_flag_starts_lowered() {
        let ctx = ApplyContext::new(SnapshotSource::Push);
        assert!(!ctx.resync_requested());
        ctx.request_resync();
        assert!(ctx.resync_requested());
        assert_eq!(ctx.source(), SnapshotSource::Push);
    }
}
