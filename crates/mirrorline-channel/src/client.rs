//! The channel client: one connection to one logical channel.
//!
//! Owns the link lifecycle (connect, reconnect with backoff, manual
//! disconnect), builds outbound envelopes, validates inbound deliveries and
//! fans them out to subscribers keyed by [`EventKind`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::config::ChannelConfig;
use crate::envelope::{EmitOptions, EnvelopeError, InboundDelivery, OutboundEnvelope, RequestResult};
use crate::error::{ChannelError, Result};
use crate::event::EventKind;
use crate::schedule::{ScheduledTask, Scheduler, TokioScheduler};
use crate::token::{NoToken, TokenProvider};
use crate::transport::{Transport, TransportError, TransportEvent};

/// Callback receiving validated deliveries.
pub type DeliveryCallback = Arc<dyn Fn(&InboundDelivery) + Send + Sync>;
/// Callback fired after a link opens.
pub type ConnectHook = Arc<dyn Fn(&ConnectInfo) + Send + Sync>;
/// Callback fired after a link closes.
pub type DisconnectHook = Arc<dyn Fn(&DisconnectInfo) + Send + Sync>;
/// Callback receiving validation and transport failures.
pub type ErrorHook = Arc<dyn Fn(&ChannelFailure) + Send + Sync>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Context passed to connect hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub channel: String,
    /// First successful connection of this client instance.
    pub first_connect: bool,
    /// The server process differs from the one of the previous connection.
    pub server_identity_changed: bool,
    pub server_identity: Option<String>,
}

/// Context passed to disconnect hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub channel: String,
    /// `disconnect()` was called; no reconnect will follow.
    pub client_initiated: bool,
    pub reason: String,
}

/// Failure reported to error hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFailure {
    /// A delivery failed envelope validation and was dropped.
    InvalidDelivery { event: EventKind, error: EnvelopeError },
    /// A connection attempt failed.
    Connection { message: String },
    /// The open link reported an error or dropped unexpectedly.
    Transport { message: String },
}

type AttemptOutcome = Option<std::result::Result<(), String>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct LinkState {
    status: ConnectionState,
    /// Outcome channel of the attempt in progress.
    attempt: Option<watch::Receiver<AttemptOutcome>>,
    attempt_id: u64,
    manual_disconnect: bool,
    ever_connected: bool,
    server_identity: Option<String>,
    /// Bumped whenever the current link is abandoned.
    generation: u64,
    pump: Option<AbortHandle>,
    retry: Option<ScheduledTask>,
    retry_attempt: u32,
    /// Token already invalidated during the current error burst.
    token_invalidated: bool,
}

#[derive(Default)]
struct Hooks {
    connect: Vec<ConnectHook>,
    disconnect: Vec<DisconnectHook>,
    error: Vec<ErrorHook>,
}

struct Inner {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    scheduler: Arc<dyn Scheduler>,
    link: Mutex<LinkState>,
    subscribers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, DeliveryCallback)>>>,
    hooks: Mutex<Hooks>,
    next_id: AtomicU64,
}

/// Builder for [`ChannelClient`].
pub struct ChannelClientBuilder {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    scheduler: Arc<dyn Scheduler>,
}

impl ChannelClientBuilder {
    /// Use `provider` for anti-forgery tokens.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.tokens = provider;
        self
    }

    /// Use `scheduler` for reconnect timers.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn build(self) -> ChannelClient {
        ChannelClient {
            inner: Arc::new(Inner {
                config: self.config,
                transport: self.transport,
                tokens: self.tokens,
                scheduler: self.scheduler,
                link: Mutex::new(LinkState {
                    status: ConnectionState::Disconnected,
                    attempt: None,
                    attempt_id: 0,
                    manual_disconnect: false,
                    ever_connected: false,
                    server_identity: None,
                    generation: 0,
                    pump: None,
                    retry: None,
                    retry_attempt: 0,
                    token_invalidated: false,
                }),
                subscribers: Mutex::new(HashMap::new()),
                hooks: Mutex::new(Hooks::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

/// Client for one logical channel. Cheap to clone; clones share the link.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<Inner>,
}

impl ChannelClient {
    /// Start building a client for `config.path` over `transport`.
    pub fn builder(config: ChannelConfig, transport: Arc<dyn Transport>) -> ChannelClientBuilder {
        ChannelClientBuilder {
            config,
            transport,
            tokens: Arc::new(NoToken),
            scheduler: Arc::new(TokioScheduler),
        }
    }

    /// The channel path.
    pub fn channel(&self) -> &str {
        &self.inner.config.path
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True while a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.link.lock().retry.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Establish the link if not already connected or connecting.
    ///
    /// Concurrent callers share one attempt and all observe its outcome.
    pub async fn connect(&self) -> Result<()> {
        Inner::connect(&self.inner).await
    }

    /// Tear down the link. Suppresses automatic reconnects until the next
    /// explicit [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let was_connected = {
            let mut link = self.inner.link.lock();
            link.manual_disconnect = true;
            if let Some(retry) = link.retry.take() {
                retry.cancel();
            }
            link.retry_attempt = 0;
            link.attempt = None;
            link.attempt_id = link.attempt_id.wrapping_add(1);
            link.generation += 1;
            if let Some(pump) = link.pump.take() {
                pump.abort();
            }
            let was = link.status == ConnectionState::Connected;
            link.status = ConnectionState::Disconnected;
            was
        };

        self.inner.transport.close().await;
        tracing::info!(channel = %self.channel(), "channel disconnected by client");

        if was_connected {
            self.inner.fire_disconnect(&DisconnectInfo {
                channel: self.channel().to_owned(),
                client_initiated: true,
                reason: "client disconnect".into(),
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Fire-and-forget send. Returns the correlation id used.
    pub async fn emit<T: Serialize + ?Sized>(
        &self,
        kind: &EventKind,
        data: &T,
        options: EmitOptions,
    ) -> Result<String> {
        let envelope = self.prepare(data, &options)?;
        let value = envelope.to_value()?;

        tracing::trace!(
            channel = %self.channel(),
            event = %kind,
            correlation_id = %envelope.correlation_id,
            "emit"
        );
        self.inner.transport.send(kind.as_str(), value).await?;
        Ok(envelope.correlation_id)
    }

    /// Send and wait for the normalized reply.
    ///
    /// Times out after `options.timeout` (or the channel default). A timeout
    /// only stops waiting; a late reply is discarded.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        kind: &EventKind,
        data: &T,
        options: EmitOptions,
    ) -> Result<RequestResult> {
        let envelope = self.prepare(data, &options)?;
        let value = envelope.to_value()?;
        let deadline = options.timeout.unwrap_or(self.inner.config.request_timeout);

        tracing::debug!(
            channel = %self.channel(),
            event = %kind,
            correlation_id = %envelope.correlation_id,
            timeout_ms = deadline.as_millis() as u64,
            "request"
        );

        let call = self.inner.transport.call(kind.as_str(), value);
        let raw = if deadline.is_zero() {
            call.await?
        } else {
            match tokio::time::timeout(deadline, call).await {
                Ok(reply) => reply?,
                Err(_) => {
                    return Err(ChannelError::Timeout {
                        event: kind.to_string(),
                        after: deadline,
                    })
                }
            }
        };

        Ok(RequestResult::normalize(raw, &envelope.correlation_id))
    }

    fn prepare<T: Serialize + ?Sized>(&self, data: &T, options: &EmitOptions) -> Result<OutboundEnvelope> {
        let envelope = OutboundEnvelope::build(data, options)?;
        envelope.check_size(self.inner.config.max_payload_bytes)?;
        if !self.is_connected() {
            return Err(ChannelError::NotConnected {
                channel: self.channel().to_owned(),
            });
        }
        Ok(envelope)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to validated deliveries of `kind`.
    ///
    /// The first subscription for a kind attaches the transport listener.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&InboundDelivery) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let first = {
            let mut subs = self.inner.subscribers.lock();
            let entry = subs.entry(kind.clone()).or_default();
            entry.push((id, Arc::new(callback)));
            entry.len() == 1
        };
        if first {
            self.inner.transport.listen(kind.as_str());
        }
        id
    }

    /// Remove one subscription. Returns false if it was not registered.
    ///
    /// Removing the last subscription for a kind detaches the listener.
    pub fn off(&self, kind: &EventKind, id: SubscriptionId) -> bool {
        let (removed, now_empty) = {
            let mut subs = self.inner.subscribers.lock();
            let Some(entry) = subs.get_mut(kind) else {
                return false;
            };
            let before = entry.len();
            entry.retain(|(sid, _)| *sid != id);
            let removed = entry.len() != before;
            let empty = entry.is_empty();
            if empty {
                subs.remove(kind);
            }
            (removed, removed && empty)
        };
        if now_empty {
            self.inner.transport.unlisten(kind.as_str());
        }
        removed
    }

    /// Number of callbacks registered for `kind`.
    pub fn subscriber_count(&self, kind: &EventKind) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// Validate and dispatch one raw delivery. Returns how many callbacks ran.
    ///
    /// Invalid deliveries are reported to error hooks and dropped.
    pub fn deliver(&self, event: &str, payload: &Value) -> usize {
        self.inner.deliver(event, payload)
    }

    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(&ConnectInfo) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().connect.push(Arc::new(hook));
    }

    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&DisconnectInfo) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().disconnect.push(Arc::new(hook));
    }

    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&ChannelFailure) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().error.push(Arc::new(hook));
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) -> ConnectFuture {
        let inner = Arc::clone(self);
        Box::pin(async move {
            let mut outcome = {
                let mut link = inner.link.lock();
                link.manual_disconnect = false;
                match (link.status, link.attempt.clone()) {
                    (ConnectionState::Connected, _) => return Ok(()),
                    (ConnectionState::Connecting, Some(rx)) => rx,
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        link.status = ConnectionState::Connecting;
                        link.attempt = Some(rx.clone());
                        link.attempt_id = link.attempt_id.wrapping_add(1);
                        let attempt_id = link.attempt_id;
                        let runner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            let result = runner.attempt(attempt_id).await;
                            tx.send_replace(Some(result));
                        });
                        rx
                    }
                }
            };

            let settled = match outcome.wait_for(Option::is_some).await {
                Ok(value) => (*value)
                    .clone()
                    .unwrap_or_else(|| Err("connection attempt abandoned".into())),
                Err(_) => Err("connection attempt abandoned".into()),
            };

            settled.map_err(|message| ChannelError::Connection {
                channel: inner.config.path.clone(),
                message,
            })
        })
    }

    /// One connection attempt; runs detached from any caller.
    async fn attempt(self: Arc<Self>, attempt_id: u64) -> std::result::Result<(), String> {
        let token = match self.tokens.get_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(channel = %self.config.path, error = %e, "token fetch failed; connecting without token");
                None
            }
        };

        let (sink, events) = mpsc::unbounded_channel();
        let open = self.transport.open(&self.config.path, token.as_deref(), sink);
        let opened = if self.config.connect_timeout.is_zero() {
            open.await
        } else {
            tokio::time::timeout(self.config.connect_timeout, open)
                .await
                .unwrap_or(Err(TransportError::ConnectTimeout))
        };

        match opened {
            Ok(hello) => {
                // Err(idle): the attempt was abandoned; idle means no newer
                // attempt owns the transport.
                let decided = {
                    let mut link = self.link.lock();
                    if link.attempt_id != attempt_id || link.manual_disconnect {
                        Err(link.status == ConnectionState::Disconnected)
                    } else {
                        link.status = ConnectionState::Connected;
                        link.attempt = None;
                        if let Some(retry) = link.retry.take() {
                            retry.cancel();
                        }
                        link.retry_attempt = 0;
                        link.token_invalidated = false;
                        link.generation += 1;

                        let first_connect = !link.ever_connected;
                        let server_identity_changed =
                            match (&link.server_identity, &hello.server_identity) {
                                (Some(previous), Some(current)) => previous != current,
                                _ => false,
                            };
                        link.ever_connected = true;
                        link.server_identity = hello.server_identity.clone();

                        Ok((
                            ConnectInfo {
                                channel: self.config.path.clone(),
                                first_connect,
                                server_identity_changed,
                                server_identity: hello.server_identity,
                            },
                            link.generation,
                        ))
                    }
                };

                let (info, generation) = match decided {
                    Ok(connected) => connected,
                    Err(idle) => {
                        tracing::debug!(channel = %self.config.path, "connection attempt superseded");
                        if idle {
                            self.transport.close().await;
                        }
                        return Err("connection attempt superseded".into());
                    }
                };

                let pump = tokio::spawn(Self::pump(Arc::downgrade(&self), events, generation));
                self.link.lock().pump = Some(pump.abort_handle());

                tracing::info!(
                    channel = %self.config.path,
                    first_connect = info.first_connect,
                    server_identity_changed = info.server_identity_changed,
                    "channel connected"
                );
                self.fire_connect(&info);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut link = self.link.lock();
                    if link.attempt_id != attempt_id {
                        return Err(message);
                    }
                    link.status = ConnectionState::Disconnected;
                    link.attempt = None;
                }
                tracing::warn!(channel = %self.config.path, error = %message, "connection attempt failed");
                self.fire_error(&ChannelFailure::Connection {
                    message: message.clone(),
                });
                self.invalidate_token_once();
                self.schedule_reconnect();
                Err(message)
            }
        }
    }

    async fn pump(weak: Weak<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>, generation: u64) {
        while let Some(event) = events.recv().await {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.link.lock().generation != generation {
                break;
            }
            match event {
                TransportEvent::Delivery { event, payload } => {
                    inner.deliver(&event, &payload);
                }
                TransportEvent::Error { message } => {
                    tracing::warn!(channel = %inner.config.path, error = %message, "transport error");
                    inner.fire_error(&ChannelFailure::Transport { message });
                }
                TransportEvent::Disconnected { reason } => {
                    inner.link_lost(generation, reason);
                    break;
                }
            }
        }
    }

    fn link_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let manual = {
            let mut link = self.link.lock();
            if link.generation != generation || link.status != ConnectionState::Connected {
                return;
            }
            link.status = ConnectionState::Disconnected;
            link.pump = None;
            link.manual_disconnect
        };

        tracing::warn!(channel = %self.config.path, reason = %reason, "channel link lost");
        self.fire_disconnect(&DisconnectInfo {
            channel: self.config.path.clone(),
            client_initiated: manual,
            reason: reason.clone(),
        });

        if !manual {
            self.fire_error(&ChannelFailure::Transport { message: reason });
            self.invalidate_token_once();
            self.schedule_reconnect();
        }
    }

    fn invalidate_token_once(&self) {
        let first_in_burst = {
            let mut link = self.link.lock();
            !std::mem::replace(&mut link.token_invalidated, true)
        };
        if first_in_burst {
            tracing::debug!(channel = %self.config.path, "invalidating cached token");
            self.tokens.invalidate_token();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.auto_reconnect {
            return;
        }
        let mut link = self.link.lock();
        if link.manual_disconnect || link.retry.is_some() || link.status != ConnectionState::Disconnected {
            return;
        }

        let delay = self.config.reconnect.delay_for(link.retry_attempt);
        link.retry_attempt = link.retry_attempt.saturating_add(1);
        tracing::debug!(
            channel = %self.config.path,
            attempt = link.retry_attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        link.retry = Some(self.scheduler.schedule(
            delay,
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let manual = {
                    let mut link = inner.link.lock();
                    link.retry = None;
                    link.manual_disconnect
                };
                if manual {
                    return;
                }
                if let Err(e) = Inner::connect(&inner).await {
                    tracing::debug!(channel = %inner.config.path, error = %e, "reconnect attempt failed");
                }
            }),
        ));
    }

    fn deliver(&self, event: &str, payload: &Value) -> usize {
        let kind = EventKind::custom(event);
        let delivery = match InboundDelivery::validate(payload) {
            Ok(delivery) => delivery,
            Err(error) => {
                tracing::warn!(channel = %self.config.path, event = %kind, error = %error, "dropping invalid delivery");
                self.fire_error(&ChannelFailure::InvalidDelivery { event: kind, error });
                return 0;
            }
        };

        let callbacks: Vec<DeliveryCallback> = self
            .subscribers
            .lock()
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            callback(&delivery);
        }
        callbacks.len()
    }

    fn fire_connect(&self, info: &ConnectInfo) {
        let hooks = self.hooks.lock().connect.clone();
        for hook in hooks {
            hook(info);
        }
    }

    fn fire_disconnect(&self, info: &DisconnectInfo) {
        let hooks = self.hooks.lock().disconnect.clone();
        for hook in hooks {
            hook(info);
        }
    }

    fn fire_error(&self, failure: &ChannelFailure) {
        let hooks = self.hooks.lock().error.clone();
        for hook in hooks {
            hook(failure);
        }
    }
}
