//! Recording implementations of the collaborator traits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mirrorline_channel::{JsonObject, TokenError, TokenProvider};
use mirrorline_sync::{
    ApplyContext, Notice, Notifier, ResumeCursors, SnapshotApplier, SnapshotSource, SyncMode,
    SyncObserver, SyncStateView,
};
use parking_lot::Mutex;

/// Records every snapshot it is handed.
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<(SnapshotSource, JsonObject)>>,
    cursors: Mutex<ResumeCursors>,
    resync_marker: Mutex<Option<String>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursors reported for non-forced handshakes.
    pub fn set_cursors(&self, cursors: ResumeCursors) {
        *self.cursors.lock() = cursors;
    }

    /// Request a resync whenever a snapshot contains `key`.
    pub fn resync_on_key(&self, key: impl Into<String>) {
        *self.resync_marker.lock() = Some(key.into());
    }

    pub fn applied(&self) -> Vec<(SnapshotSource, JsonObject)> {
        self.applied.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.applied.lock().len()
    }

    pub fn count_from(&self, source: SnapshotSource) -> usize {
        self.applied.lock().iter().filter(|(s, _)| *s == source).count()
    }

    pub fn last(&self) -> Option<JsonObject> {
        self.applied.lock().last().map(|(_, s)| s.clone())
    }
}

impl SnapshotApplier for RecordingApplier {
    fn apply_snapshot(&self, snapshot: &JsonObject, ctx: &ApplyContext) -> bool {
        if let Some(marker) = self.resync_marker.lock().as_deref() {
            if snapshot.contains_key(marker) {
                ctx.request_resync();
            }
        }
        self.applied.lock().push((ctx.source(), snapshot.clone()));
        true
    }

    fn resume_cursors(&self) -> ResumeCursors {
        *self.cursors.lock()
    }
}

/// What a [`RecordingNotifier`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeEvent {
    Shown(Notice),
    Cleared(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NoticeEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NoticeEvent> {
        self.events.lock().clone()
    }

    pub fn shown(&self) -> Vec<Notice> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                NoticeEvent::Shown(n) => Some(n.clone()),
                NoticeEvent::Cleared(_) => None,
            })
            .collect()
    }

    pub fn cleared(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, NoticeEvent::Cleared(_)))
            .count()
    }

    /// Notice currently showing under `group`, if any.
    pub fn current(&self, group: &str) -> Option<Notice> {
        let mut showing = None;
        for event in self.events.lock().iter() {
            match event {
                NoticeEvent::Shown(n) if n.group == group => showing = Some(n.clone()),
                NoticeEvent::Cleared(g) if g == group => showing = None,
                _ => {}
            }
        }
        showing
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.events.lock().push(NoticeEvent::Shown(notice));
    }

    fn clear(&self, group: &str) {
        self.events.lock().push(NoticeEvent::Cleared(group.to_owned()));
    }
}

/// Records every state view published by a coordinator.
#[derive(Default)]
pub struct RecordingObserver {
    views: Mutex<Vec<SyncStateView>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn views(&self) -> Vec<SyncStateView> {
        self.views.lock().clone()
    }

    /// Distinct consecutive modes observed.
    pub fn modes(&self) -> Vec<SyncMode> {
        let mut modes: Vec<SyncMode> = Vec::new();
        for view in self.views.lock().iter() {
            if modes.last() != Some(&view.mode) {
                modes.push(view.mode);
            }
        }
        modes
    }
}

impl SyncObserver for RecordingObserver {
    fn on_change(&self, state: &SyncStateView) {
        self.views.lock().push(state.clone());
    }
}

/// Token provider returning `"{base}-{n}"`, where `n` counts invalidations.
pub struct StaticTokenProvider {
    base: String,
    fetches: AtomicUsize,
    invalidations: AtomicUsize,
    failing: AtomicBool,
}

impl StaticTokenProvider {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            fetches: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Make fetches fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<Option<String>, TokenError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TokenError("token endpoint unavailable".into()));
        }
        Ok(Some(format!("{}-{}", self.base, self.invalidations())))
    }

    fn invalidate_token(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
