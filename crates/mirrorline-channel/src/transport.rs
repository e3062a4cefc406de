//! Transport abstraction beneath the channel client.
//!
//! A transport owns the physical link (a WebSocket, a socket.io namespace,
//! an in-memory pipe in tests). Inbound traffic and link state changes are
//! pushed into the [`TransportSink`] handed over when the link opens.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote end refused or could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The link closed while an operation was outstanding.
    #[error("link closed: {0}")]
    Closed(String),

    /// Opening the link took longer than allowed.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A raw delivery for a listened event name.
    Delivery { event: String, payload: Value },
    /// The link dropped.
    Disconnected { reason: String },
    /// A non-fatal link error.
    Error { message: String },
}

/// Sender half used by a transport to report link activity.
pub type TransportSink = mpsc::UnboundedSender<TransportEvent>;

/// What the server told us while the link was opening.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHello {
    /// Opaque id of the server process that accepted the link.
    pub server_identity: Option<String>,
}

/// Physical link to one logical channel.
///
/// `listen`/`unlisten` are idempotent per event name and survive reopening
/// the link; the channel client calls them once per event kind.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the link to `channel`, authenticating with `token` if given.
    async fn open(
        &self,
        channel: &str,
        token: Option<&str>,
        sink: TransportSink,
    ) -> Result<ServerHello, TransportError>;

    /// Close the link. Must not report a `Disconnected` event afterwards.
    async fn close(&self);

    /// Fire-and-forget send.
    async fn send(&self, event: &str, envelope: Value) -> Result<(), TransportError>;

    /// Send and wait for the server's acknowledgement payload.
    async fn call(&self, event: &str, envelope: Value) -> Result<Value, TransportError>;

    /// Start forwarding deliveries for `event` into the sink.
    fn listen(&self, event: &str);

    /// Stop forwarding deliveries for `event`.
    fn unlisten(&self, event: &str);
}
