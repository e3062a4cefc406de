//! Error types for the Mirrorline facade.

use std::path::PathBuf;

use mirrorline_channel::ChannelError;
use mirrorline_sync::{HandshakeFailure, SyncError};
use thiserror::Error;

use crate::polling::RefreshError;

/// Errors that can occur during Mirrorline operations.
#[derive(Debug, Error)]
pub enum MirrorlineError {
    /// Channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Handshake did not establish a baseline.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    /// Polling refresh failed.
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Configuration could not be read or parsed.
    #[error("invalid configuration{}: {message}", location(.path))]
    Config {
        path: Option<PathBuf>,
        message: String,
    },

    /// Logging was already initialised or the filter is invalid.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

fn location(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" in {}", p.display()))
        .unwrap_or_default()
}

/// Result type for Mirrorline operations.
pub type Result<T> = std::result::Result<T, MirrorlineError>;
