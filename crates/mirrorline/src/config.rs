//! Combined configuration, loadable from JSON.

use std::path::Path;

use mirrorline_channel::ChannelConfig;
use mirrorline_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorlineError, Result};
use crate::polling::PollingConfig;

/// Default tracing filter when neither config nor `RUST_LOG` provides one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Configuration for a [`Session`](crate::Session).
///
/// Every section and field is optional in JSON:
///
/// ```json
/// {
///   "channel": { "path": "/ws/state", "request_timeout_ms": 15000 },
///   "sync": { "timezone": "Europe/Oslo", "failure_threshold": 5 },
///   "polling": { "interval_ms": 3000 },
///   "log_filter": "mirrorline=debug"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorlineConfig {
    pub channel: ChannelConfig,
    pub sync: SyncConfig,
    pub polling: PollingConfig,
    pub log_filter: String,
}

impl Default for MirrorlineConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            sync: SyncConfig::default(),
            polling: PollingConfig::default(),
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

impl MirrorlineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MirrorlineError::Config {
            path: None,
            message: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |message: String| MirrorlineError::Config {
            path: Some(path.to_path_buf()),
            message,
        };

        let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), channel = %config.channel.path, "loaded configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_object_yields_defaults() {
        let config = MirrorlineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, MirrorlineConfig::default());
    }

    #[test]
    fn nested_sections_override_fields() {
        let config = MirrorlineConfig::from_json_str(
            r#"{
                "channel": { "path": "/ws/tasks", "max_payload_bytes": 1024 },
                "sync": { "reconnect_cooldown_ms": 2000, "retry": { "base_ms": 250 } },
                "polling": { "interval_ms": 1500 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.channel.path, "/ws/tasks");
        assert_eq!(config.channel.max_payload_bytes, 1024);
        assert_eq!(config.sync.reconnect_cooldown, Duration::from_secs(2));
        assert_eq!(config.sync.retry.base, Duration::from_millis(250));
        assert_eq!(config.sync.retry.cap, Duration::from_secs(30));
        assert_eq!(config.polling.interval, Duration::from_millis(1500));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = MirrorlineConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, MirrorlineError::Config { path: None, .. }));
    }
}
