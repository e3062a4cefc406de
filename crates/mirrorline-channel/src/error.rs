//! Error types for the channel client.

use std::time::Duration;

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::transport::TransportError;

/// Errors that can occur during channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has no established connection.
    #[error("channel {channel} is not connected")]
    NotConnected { channel: String },

    /// Connection establishment failed.
    #[error("connection to {channel} failed: {message}")]
    Connection { channel: String, message: String },

    /// The transport failed while sending or awaiting a reply.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Serialized payload exceeds the configured ceiling.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// No reply arrived before the caller's deadline.
    #[error("request `{event}` timed out after {after:?}")]
    Timeout { event: String, after: Duration },

    /// Envelope options were contradictory.
    #[error("invalid envelope options: {0}")]
    InvalidOptions(String),

    /// Inbound delivery failed schema validation.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    /// Payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    /// Returns true for failures caused by the link rather than the caller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChannelError::NotConnected { .. }
                | ChannelError::Connection { .. }
                | ChannelError::Transport(_)
                | ChannelError::Timeout { .. }
        )
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        let err = ChannelError::Timeout {
            event: "state_request".into(),
            after: Duration::from_secs(1),
        };
        assert!(err.is_transport());
        assert!(!ChannelError::PayloadTooLarge { size: 2, limit: 1 }.is_transport());
    }

    #[test]
    fn error_display() {
        let err = ChannelError::NotConnected {
            channel: "/ws/state".into(),
        };
        assert_eq!(err.to_string(), "channel /ws/state is not connected");
    }
}
