//! # Mirrorline Channel
//!
//! Client side of a persistent bidirectional event channel.
//!
//! ## Overview
//!
//! A [`ChannelClient`] owns one link to one named channel. It:
//!
//! - **Frames** every outbound call in an [`OutboundEnvelope`] with a
//!   correlation id, enforcing a serialized size ceiling
//! - **Correlates** request/response pairs, with an optional deadline
//! - **Validates** every inbound delivery before any subscriber sees it
//! - **Fans out** deliveries to callbacks keyed by [`EventKind`], sharing
//!   one transport listener per kind
//! - **Reconnects** after unexpected failures with exponential backoff
//!
//! The physical link is abstracted behind the [`Transport`] trait.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirrorline_channel::{ChannelClient, ChannelConfig, EmitOptions, EventKind, Transport};
//!
//! async fn example(transport: Arc<dyn Transport>) -> mirrorline_channel::Result<()> {
//!     let client = ChannelClient::builder(ChannelConfig::new("/ws/state"), transport).build();
//!
//!     client.on(EventKind::StatePush, |delivery| {
//!         println!("push {}", delivery.event_id);
//!     });
//!     client.connect().await?;
//!
//!     let reply = client
//!         .request(&EventKind::StateRequest, &serde_json::json!({}), EmitOptions::default())
//!         .await?;
//!     println!("{} results", reply.results.len());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod registry;
pub mod schedule;
pub mod token;
pub mod transport;

pub use backoff::Backoff;
pub use client::{
    ChannelClient, ChannelClientBuilder, ChannelFailure, ConnectInfo, ConnectionState,
    DisconnectInfo, SubscriptionId,
};
pub use config::{duration_ms, ChannelConfig, DEFAULT_MAX_PAYLOAD_BYTES};
pub use envelope::{
    generate_correlation_id, EmitOptions, EnvelopeError, HandlerErrorInfo, HandlerResult,
    InboundDelivery, JsonObject, OutboundEnvelope, RequestResult, MALFORMED_RESULT_CODE,
};
pub use error::{ChannelError, Result};
pub use event::EventKind;
pub use registry::ChannelRegistry;
pub use schedule::{CancelToken, Clock, ScheduledTask, Scheduler, SystemClock, Task, TokioScheduler};
pub use token::{NoToken, TokenError, TokenProvider};
pub use transport::{ServerHello, Transport, TransportError, TransportEvent, TransportSink};
