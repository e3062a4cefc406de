//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::{MirrorlineError, Result};

/// Install a global `fmt` subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `default_filter`. Fails if a global subscriber is already installed.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| MirrorlineError::Logging(e.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| MirrorlineError::Logging(e.to_string()))
}
