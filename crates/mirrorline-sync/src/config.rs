//! Sync coordinator configuration.

use std::time::Duration;

use mirrorline_channel::{duration_ms, Backoff};
use serde::{Deserialize, Serialize};

/// Notice group used for connection status notices.
pub const DEFAULT_NOTICE_GROUP: &str = "mirrorline.connection";

/// Configuration for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for one handshake round trip.
    #[serde(with = "duration_ms", rename = "handshake_timeout_ms")]
    pub handshake_timeout: Duration,
    /// Backoff between failed handshakes.
    pub retry: Backoff,
    /// Consecutive failures that force a transport reconnect.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    #[serde(with = "duration_ms", rename = "failure_window_ms")]
    pub failure_window: Duration,
    /// Minimum spacing between forced reconnects.
    #[serde(with = "duration_ms", rename = "reconnect_cooldown_ms")]
    pub reconnect_cooldown: Duration,
    /// IANA timezone sent with each handshake.
    pub timezone: Option<String>,
    /// Context synchronized before any explicit switch.
    pub context_id: Option<String>,
    /// Group key for outage notices.
    pub notice_group: String,
}

impl SyncConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: Backoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            retry: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)).with_jitter(true),
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            reconnect_cooldown: Duration::from_secs(5),
            timezone: None,
            context_id: None,
            notice_group: DEFAULT_NOTICE_GROUP.to_owned(),
        }
    }
}
