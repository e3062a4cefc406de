//! Polling fallback used while the push stream cannot be trusted.
//!
//! The driver watches the coordinator's mode signal. While the mode is
//! `Degraded` or `Disconnected` it calls the [`Refresher`] on a fixed
//! interval, feeds returned snapshots to the coordinator's applier and asks
//! for a fresh handshake when the link is up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirrorline_channel::{duration_ms, JsonObject};
use mirrorline_sync::Coordinator;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

/// An out-of-band refresh failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RefreshError(pub String);

/// Fetches current state without the push stream, e.g. over HTTP.
#[async_trait]
pub trait Refresher: Send + Sync {
    /// `Ok(None)` means the refresh succeeded without a snapshot to apply.
    async fn refresh(&self) -> Result<Option<JsonObject>, RefreshError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    pub enabled: bool,
}

impl PollingConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            enabled: true,
        }
    }
}

/// Background polling task. Stops when dropped.
pub struct PollingDriver {
    task: JoinHandle<()>,
}

impl PollingDriver {
    /// Start polling on the current Tokio runtime.
    pub fn spawn(coordinator: Coordinator, refresher: Arc<dyn Refresher>, config: &PollingConfig) -> Self {
        let interval = config.interval.max(Duration::from_millis(1));
        Self {
            task: tokio::spawn(run(coordinator, refresher, interval)),
        }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollingDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(coordinator: Coordinator, refresher: Arc<dyn Refresher>, interval: Duration) {
    let mut modes = coordinator.watch_mode();
    loop {
        let mode = *modes.borrow_and_update();
        if !mode.wants_polling() {
            if modes.changed().await.is_err() {
                break;
            }
            continue;
        }

        tokio::select! {
            changed = modes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => poll_once(&coordinator, refresher.as_ref()).await,
        }
    }
}

async fn poll_once(coordinator: &Coordinator, refresher: &dyn Refresher) {
    match refresher.refresh().await {
        Ok(snapshot) => {
            let applied = snapshot.as_ref().map_or(false, |s| coordinator.apply_polled(s));
            tracing::debug!(applied, mode = %coordinator.mode(), "polling refresh succeeded");
            if coordinator.channel().is_connected() {
                coordinator.request_resync();
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "polling refresh failed");
        }
    }
}
