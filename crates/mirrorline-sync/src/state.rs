//! Sync mode and derived state.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Sync mode of the coordinator.
///
/// ```text
/// Disconnected ──connect──► HandshakePending ──ok──► Healthy
///       ▲                        │      ▲              │
///       │                     failure   └──gap/epoch───┘
///       │                        ▼
///       └───────disconnect──── Degraded ──retry ok──► Healthy
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMode {
    /// No link.
    Disconnected,
    /// A handshake is in flight; pushes are ignored.
    HandshakePending,
    /// Baseline established; pushes are applied in order.
    Healthy,
    /// The last handshake failed on an open link; the polling fallback
    /// governs refreshes until a retry succeeds.
    Degraded,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Disconnected => "DISCONNECTED",
            SyncMode::HandshakePending => "HANDSHAKE_PENDING",
            SyncMode::Healthy => "HEALTHY",
            SyncMode::Degraded => "DEGRADED",
        }
    }

    /// Pushes are the source of truth only in this mode.
    pub fn accepts_pushes(&self) -> bool {
        matches!(self, SyncMode::Healthy)
    }

    /// The polling fallback refreshes state in these modes.
    pub fn wants_polling(&self) -> bool {
        matches!(self, SyncMode::Degraded | SyncMode::Disconnected)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the coordinator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStateView {
    pub mode: SyncMode,
    pub context_id: Option<String>,
    pub runtime_epoch: Option<String>,
    pub seq_base: u64,
    pub last_seq: u64,
    pub resync_required: bool,
    pub handshake_in_flight: bool,
    pub request_queued: bool,
    pub consecutive_failures: u32,
    /// Runtime id announced by the most recent `server_restart`.
    pub announced_restart: Option<String>,
}

/// Tracks consecutive handshake failures and forced-reconnect spacing.
#[derive(Debug, Default)]
pub(crate) struct FailureTracker {
    count: u32,
    streak_started: Option<Instant>,
    last_forced_reconnect: Option<Instant>,
}

impl FailureTracker {
    /// Record one failure. Returns the streak length.
    ///
    /// A streak older than `window` restarts at one.
    pub fn record(&mut self, now: Instant, window: Duration) -> u32 {
        match self.streak_started {
            Some(start) if now.saturating_duration_since(start) <= window => {
                self.count = self.count.saturating_add(1);
            }
            _ => {
                self.streak_started = Some(now);
                self.count = 1;
            }
        }
        self.count
    }

    /// Clear the streak. Cooldown bookkeeping survives.
    pub fn reset(&mut self) {
        self.count = 0;
        self.streak_started = None;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Claim a forced reconnect if the streak reached `threshold` and the
    /// cooldown since the previous one has elapsed.
    pub fn claim_reconnect(&mut self, now: Instant, threshold: u32, cooldown: Duration) -> bool {
        if self.count < threshold {
            return false;
        }
        let cooled = self
            .last_forced_reconnect
            .map_or(true, |last| now.saturating_duration_since(last) >= cooldown);
        if cooled {
            self.last_forced_reconnect = Some(now);
        }
        cooled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);
    const COOLDOWN: Duration = Duration::from_secs(5);

    #[test]
    fn streak_counts_within_window() {
        let t0 = Instant::now();
        let mut tracker = FailureTracker::default();
        assert_eq!(tracker.record(t0, WINDOW), 1);
        assert_eq!(tracker.record(t0 + Duration::from_secs(10), WINDOW), 2);
        assert_eq!(tracker.record(t0 + Duration::from_secs(61), WINDOW), 1);
    }

    #[test]
    fn reconnect_respects_threshold_and_cooldown() {
        let t0 = Instant::now();
        let mut tracker = FailureTracker::default();
        tracker.record(t0, WINDOW);
        tracker.record(t0, WINDOW);
        assert!(!tracker.claim_reconnect(t0, 3, COOLDOWN));

        tracker.record(t0, WINDOW);
        assert!(tracker.claim_reconnect(t0, 3, COOLDOWN));

        tracker.record(t0 + Duration::from_secs(1), WINDOW);
        assert!(!tracker.claim_reconnect(t0 + Duration::from_secs(1), 3, COOLDOWN));
        assert!(tracker.claim_reconnect(t0 + COOLDOWN, 3, COOLDOWN));
    }

    #[test]
    fn reset_keeps_cooldown() {
        let t0 = Instant::now();
        let mut tracker = FailureTracker::default();
        for _ in 0..3 {
            tracker.record(t0, WINDOW);
        }
        assert!(tracker.claim_reconnect(t0, 3, COOLDOWN));
        tracker.reset();
        assert_eq!(tracker.count(), 0);
        for _ in 0..3 {
            tracker.record(t0 + Duration::from_secs(2), WINDOW);
        }
        assert!(!tracker.claim_reconnect(t0 + Duration::from_secs(2), 3, COOLDOWN));
    }

    #[test]
    fn mode_names() {
        assert_eq!(SyncMode::HandshakePending.to_string(), "HANDSHAKE_PENDING");
        assert!(SyncMode::Healthy.accepts_pushes());
        assert!(SyncMode::Degraded.wants_polling());
        assert!(!SyncMode::HandshakePending.wants_polling());
        assert_eq!(serde_json::to_value(SyncMode::Degraded).unwrap(), "DEGRADED");
    }
}
