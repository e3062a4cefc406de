//! Error types for the sync coordinator.

use mirrorline_channel::ChannelError;
use thiserror::Error;

/// Why a handshake did not establish a baseline.
///
/// Cloneable so every caller coalesced onto one handshake receives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeFailure {
    /// The server answered with `ok = false`.
    #[error("handshake rejected by server: {code}")]
    Rejected { code: String },

    /// The reply lacked required baseline fields.
    #[error("malformed handshake reply: {0}")]
    Malformed(String),

    /// The request could not be sent or the link failed mid-flight.
    #[error("handshake transport failure: {0}")]
    Transport(String),

    /// No reply within the handshake timeout.
    #[error("handshake timed out")]
    Timeout,

    /// A newer request or a disconnect made this one irrelevant.
    #[error("handshake superseded")]
    Superseded,
}

impl HandshakeFailure {
    /// Short code for logs.
    pub fn code(&self) -> &str {
        match self {
            HandshakeFailure::Rejected { code } => code,
            HandshakeFailure::Malformed(_) => "malformed",
            HandshakeFailure::Transport(_) => "transport",
            HandshakeFailure::Timeout => "timeout",
            HandshakeFailure::Superseded => "superseded",
        }
    }

    pub(crate) fn from_channel(err: ChannelError) -> Self {
        match err {
            ChannelError::Timeout { .. } => HandshakeFailure::Timeout,
            other => HandshakeFailure::Transport(other.to_string()),
        }
    }
}

/// Errors surfaced by the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Handshake(#[from] HandshakeFailure),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
