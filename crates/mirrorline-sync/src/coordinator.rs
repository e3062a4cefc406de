//! The sync coordinator.
//!
//! Arbitrates between the push stream and handshakes for one channel:
//!
//! - every (re)connect triggers a forced full handshake that establishes a
//!   baseline `(runtime_epoch, seq_base)`;
//! - in `Healthy` mode pushes are applied only when they carry the baseline
//!   epoch and the next sequence number, anything else forces a resync;
//! - at most one handshake is in flight and at most one is queued, with
//!   subsumed requests sharing the result of the one that covers them;
//! - repeated handshake failures degrade the mode, back off, raise an
//!   outage notice and eventually force a transport reconnect.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use mirrorline_channel::{
    ChannelClient, Clock, ConnectInfo, DisconnectInfo, EmitOptions, EventKind, JsonObject,
    ScheduledTask, Scheduler, SubscriptionId, SystemClock, TokioScheduler,
};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::apply::{
    ApplyContext, NoopNotifier, Notice, NoticeLevel, Notifier, SnapshotApplier, SnapshotSource,
    SyncObserver,
};
use crate::config::SyncConfig;
use crate::error::HandshakeFailure;
use crate::messages::{restart_runtime_id, Baseline, ResumeCursors, StatePush, StateRequest};
use crate::state::{FailureTracker, SyncMode, SyncStateView};

/// Result delivered to every caller waiting on one handshake.
pub type HandshakeOutcome = std::result::Result<Baseline, HandshakeFailure>;

/// Awaitable, cloneable handle on a handshake result.
pub type HandshakeTicket = Shared<BoxFuture<'static, HandshakeOutcome>>;

/// Correlation id prefix of handshake requests.
const HANDSHAKE_PREFIX: &str = "state";

fn ticket_pair() -> (oneshot::Sender<HandshakeOutcome>, HandshakeTicket) {
    let (tx, rx) = oneshot::channel();
    let ticket = rx
        .map(|received| received.unwrap_or(Err(HandshakeFailure::Superseded)))
        .boxed()
        .shared();
    (tx, ticket)
}

struct InFlight {
    request: StateRequest,
    ticket: HandshakeTicket,
    generation: u64,
}

struct Queued {
    request: StateRequest,
    ticket: HandshakeTicket,
    tx: oneshot::Sender<HandshakeOutcome>,
}

/// A handshake about to hit the network.
struct Job {
    request: StateRequest,
    tx: oneshot::Sender<HandshakeOutcome>,
    generation: u64,
}

enum NoticeAction {
    Show(Notice),
    Clear,
}

/// Side effects decided under the state lock, run after releasing it.
#[derive(Default)]
struct Effects {
    notices: Vec<NoticeAction>,
    force_reconnect: bool,
}

struct State {
    mode: SyncMode,
    context_id: Option<String>,
    runtime_epoch: Option<String>,
    seq_base: u64,
    last_seq: u64,
    resync_required: bool,
    in_flight: Option<InFlight>,
    queued: Option<Queued>,
    /// Bumped on disconnect and context switch; older handshake results are ignored.
    generation: u64,
    retry: Option<ScheduledTask>,
    retry_attempt: u32,
    failures: FailureTracker,
    outage_notified: bool,
    restart_pending: bool,
    announced_restart: Option<String>,
    dirty: bool,
}

impl State {
    fn new(context_id: Option<String>) -> Self {
        Self {
            mode: SyncMode::Disconnected,
            context_id,
            runtime_epoch: None,
            seq_base: 0,
            last_seq: 0,
            resync_required: true,
            in_flight: None,
            queued: None,
            generation: 0,
            retry: None,
            retry_attempt: 0,
            failures: FailureTracker::default(),
            outage_notified: false,
            restart_pending: false,
            announced_restart: None,
            dirty: false,
        }
    }

    fn set_mode(&mut self, mode: SyncMode) {
        if self.mode != mode {
            tracing::debug!(from = %self.mode, to = %mode, "sync mode change");
            self.mode = mode;
            self.dirty = true;
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
        self.retry_attempt = 0;
    }

    fn view(&self) -> SyncStateView {
        SyncStateView {
            mode: self.mode,
            context_id: self.context_id.clone(),
            runtime_epoch: self.runtime_epoch.clone(),
            seq_base: self.seq_base,
            last_seq: self.last_seq,
            resync_required: self.resync_required,
            handshake_in_flight: self.in_flight.is_some(),
            request_queued: self.queued.is_some(),
            consecutive_failures: self.failures.count(),
            announced_restart: self.announced_restart.clone(),
        }
    }

    /// Admit `request` into the in-flight/queued slots.
    ///
    /// Returns the ticket the caller should await and, when the request
    /// must go out now, the job to run.
    fn enqueue(&mut self, request: StateRequest) -> (HandshakeTicket, Option<Job>) {
        let Some(active) = &self.in_flight else {
            let (tx, ticket) = ticket_pair();
            self.in_flight = Some(InFlight {
                request: request.clone(),
                ticket: ticket.clone(),
                generation: self.generation,
            });
            self.set_mode(SyncMode::HandshakePending);
            self.dirty = true;
            let job = Job {
                request,
                tx,
                generation: self.generation,
            };
            return (ticket, Some(job));
        };

        let Some(queued) = self.queued.as_mut() else {
            // A handshake from an older generation settles as stale, so it
            // cannot stand in for this one.
            let current = active.generation == self.generation;
            if current && active.request.covers(&request) {
                tracing::debug!("state request coalesced with in-flight handshake");
                return (active.ticket.clone(), None);
            }
            if !current {
                tracing::debug!("state request queued behind stale handshake");
                self.set_mode(SyncMode::HandshakePending);
            }
            let (tx, ticket) = ticket_pair();
            self.queued = Some(Queued {
                request,
                ticket: ticket.clone(),
                tx,
            });
            self.dirty = true;
            return (ticket, None);
        };

        if !queued.request.same_context(&request) || request.covers(&queued.request) {
            queued.request = request;
        } else if queued.request.covers(&request) {
            tracing::debug!("state request subsumed by queued handshake");
        } else {
            queued.request = queued.request.merged(&request);
        }
        (queued.ticket.clone(), None)
    }
}

struct Inner {
    channel: ChannelClient,
    config: SyncConfig,
    applier: Arc<dyn SnapshotApplier>,
    notifier: Arc<dyn Notifier>,
    observer: Option<Arc<dyn SyncObserver>>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    /// Serializes snapshot application so stores see snapshots in acceptance order.
    apply_lock: Mutex<()>,
    mode_tx: watch::Sender<SyncMode>,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    channel: ChannelClient,
    applier: Arc<dyn SnapshotApplier>,
    config: SyncConfig,
    notifier: Arc<dyn Notifier>,
    observer: Option<Arc<dyn SyncObserver>>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Timer source for handshake retries and forced reconnects.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Time source for the failure window and reconnect cooldown.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the coordinator and attach it to the channel.
    ///
    /// If the channel is already connected a full handshake starts
    /// immediately, which requires a Tokio runtime.
    pub fn build(self) -> Coordinator {
        let (mode_tx, _) = watch::channel(SyncMode::Disconnected);
        let inner = Arc::new(Inner {
            state: Mutex::new(State::new(self.config.context_id.clone())),
            channel: self.channel,
            config: self.config,
            applier: self.applier,
            notifier: self.notifier,
            observer: self.observer,
            scheduler: self.scheduler,
            clock: self.clock,
            apply_lock: Mutex::new(()),
            mode_tx,
            subscriptions: Mutex::new(Vec::new()),
        });
        Inner::attach(&inner);

        if inner.channel.is_connected() {
            inner.request_resync();
        }
        Coordinator { inner }
    }
}

/// Sync coordinator for one channel. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder(channel: ChannelClient, applier: Arc<dyn SnapshotApplier>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            channel,
            applier,
            config: SyncConfig::default(),
            notifier: Arc::new(NoopNotifier),
            observer: None,
            scheduler: Arc::new(TokioScheduler),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn channel(&self) -> &ChannelClient {
        &self.inner.channel
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn mode(&self) -> SyncMode {
        self.inner.state.lock().mode
    }

    /// Receiver tracking the current mode.
    pub fn watch_mode(&self) -> watch::Receiver<SyncMode> {
        self.inner.mode_tx.subscribe()
    }

    pub fn state(&self) -> SyncStateView {
        self.inner.state.lock().view()
    }

    /// Ask for a handshake. Requires a Tokio runtime.
    ///
    /// With `force_full` the server resends everything and the local
    /// baseline is discarded; otherwise the applier's resume cursors are
    /// used. A request covered by the one in flight shares its result.
    pub fn send_state_request(&self, force_full: bool) -> HandshakeTicket {
        self.inner.send_state_request(force_full)
    }

    /// [`send_state_request`](Self::send_state_request) and wait for the outcome.
    pub async fn request_sync(&self, force_full: bool) -> HandshakeOutcome {
        self.send_state_request(force_full).await
    }

    /// Fire-and-forget forced full resync.
    pub fn request_resync(&self) {
        self.inner.request_resync();
    }

    /// Retarget synchronization at another context.
    ///
    /// Drops the current baseline; results of handshakes for the previous
    /// context are ignored.
    pub fn switch_context(&self, context_id: Option<String>) -> HandshakeTicket {
        self.inner.switch_context(context_id)
    }

    /// Feed one `state_push` payload.
    pub fn handle_push(&self, data: &JsonObject) {
        self.inner.handle_push(data);
    }

    /// Feed one `server_restart` payload.
    pub fn handle_server_restart(&self, data: &JsonObject) {
        self.inner.handle_server_restart(data);
    }

    /// Apply a snapshot fetched by a polling fallback.
    ///
    /// Ignored while `Healthy`, where the push stream is authoritative.
    /// Returns whether the snapshot was handed to the applier.
    pub fn apply_polled(&self, snapshot: &JsonObject) -> bool {
        let _apply = self.inner.apply_lock.lock();
        if self.mode().accepts_pushes() {
            tracing::debug!("ignoring polled snapshot while healthy");
            return false;
        }
        let resync = self.inner.apply(snapshot, SnapshotSource::Poll);
        drop(_apply);
        if resync {
            self.inner.request_resync();
        }
        true
    }

    /// Wait until no handshake is in flight or queued.
    pub async fn settled(&self) {
        loop {
            let ticket = {
                let st = self.inner.state.lock();
                st.in_flight
                    .as_ref()
                    .map(|f| f.ticket.clone())
                    .or_else(|| st.queued.as_ref().map(|q| q.ticket.clone()))
            };
            match ticket {
                Some(ticket) => {
                    let _ = ticket.await;
                }
                None => return,
            }
        }
    }

    /// Stop receiving pushes and restart hints from the channel.
    pub fn detach(&self) {
        let subs = std::mem::take(&mut *self.inner.subscriptions.lock());
        for (kind, id) in subs {
            self.inner.channel.off(&kind, id);
        }
    }
}

impl Inner {
    fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.channel.on_connect({
            let weak = Weak::clone(&weak);
            move |info| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_connect(info);
                }
            }
        });
        self.channel.on_disconnect({
            let weak = Weak::clone(&weak);
            move |info| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_disconnect(info);
                }
            }
        });

        let push = self.channel.on(EventKind::StatePush, {
            let weak = Weak::clone(&weak);
            move |delivery| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_push(&delivery.data);
                }
            }
        });
        let restart = self.channel.on(EventKind::ServerRestart, move |delivery| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_server_restart(&delivery.data);
            }
        });

        let mut subs = self.subscriptions.lock();
        subs.push((EventKind::StatePush, push));
        subs.push((EventKind::ServerRestart, restart));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State publication
    // ─────────────────────────────────────────────────────────────────────────

    /// Take a view if anything changed. Call under the state lock.
    fn commit(&self, st: &mut State) -> Option<SyncStateView> {
        if !std::mem::take(&mut st.dirty) {
            return None;
        }
        let view = st.view();
        self.mode_tx.send_if_modified(|mode| {
            let changed = *mode != view.mode;
            *mode = view.mode;
            changed
        });
        Some(view)
    }

    /// Notify the observer. Call without locks held.
    fn publish(&self, view: Option<SyncStateView>) {
        if let (Some(view), Some(observer)) = (view, &self.observer) {
            observer.on_change(&view);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handshakes
    // ─────────────────────────────────────────────────────────────────────────

    fn send_state_request(self: &Arc<Self>, force_full: bool) -> HandshakeTicket {
        let cursors = if force_full {
            ResumeCursors::FULL
        } else {
            self.applier.resume_cursors()
        };

        let (ticket, job, view) = {
            let mut st = self.state.lock();
            let full = force_full || st.resync_required || st.runtime_epoch.is_none();
            let context = st.context_id.clone();
            let timezone = self.config.timezone.clone();
            let request = if full {
                StateRequest::full(context, timezone)
            } else {
                StateRequest::resume(context, cursors, timezone)
            };
            let (ticket, job) = st.enqueue(request);
            (ticket, job, self.commit(&mut st))
        };
        self.publish(view);

        if let Some(job) = job {
            tokio::spawn(Arc::clone(self).run(job));
        }
        ticket
    }

    fn request_resync(self: &Arc<Self>) {
        drop(self.send_state_request(true));
    }

    /// Drive `job` and every queued request promoted after it.
    async fn run(self: Arc<Self>, mut job: Job) {
        loop {
            let outcome = self.perform(&job.request).await;
            let next = self.settle(job.generation, &outcome);
            let _ = job.tx.send(outcome);
            match next {
                Some(promoted) => job = promoted,
                None => break,
            }
        }
    }

    async fn perform(&self, request: &StateRequest) -> HandshakeOutcome {
        tracing::debug!(
            channel = %self.channel.channel(),
            context = ?request.context_id,
            full = request.full,
            log_from = request.log_from,
            notifications_from = request.notifications_from,
            "sending state request"
        );

        let options = EmitOptions::default()
            .with_correlation_prefix(HANDSHAKE_PREFIX)
            .with_timeout(self.config.handshake_timeout);

        match self.channel.request(&EventKind::StateRequest, request, options).await {
            Ok(reply) => Baseline::from_reply(&reply),
            Err(e) => Err(HandshakeFailure::from_channel(e)),
        }
    }

    /// Record the outcome of a handshake and promote the queued request.
    fn settle(self: &Arc<Self>, generation: u64, outcome: &HandshakeOutcome) -> Option<Job> {
        let apply_guard = self.apply_lock.lock();
        let mut effects = Effects::default();

        let (next, snapshot, view) = {
            let mut st = self.state.lock();
            st.in_flight = None;
            st.dirty = true;

            let mut snapshot = None;
            if generation != st.generation {
                tracing::debug!(generation, current = st.generation, "discarding stale handshake result");
            } else {
                match outcome {
                    Ok(baseline) => {
                        self.on_baseline(&mut st, baseline, &mut effects);
                        snapshot = baseline.snapshot.as_ref();
                    }
                    Err(failure) => self.on_failure(&mut st, failure, &mut effects),
                }
            }

            let next = st.queued.take().map(|queued| {
                st.in_flight = Some(InFlight {
                    request: queued.request.clone(),
                    ticket: queued.ticket,
                    generation: st.generation,
                });
                st.set_mode(SyncMode::HandshakePending);
                Job {
                    request: queued.request,
                    tx: queued.tx,
                    generation: st.generation,
                }
            });
            (next, snapshot, self.commit(&mut st))
        };

        let resync = snapshot.map_or(false, |s| self.apply(s, SnapshotSource::Handshake));
        drop(apply_guard);

        self.publish(view);
        self.run_effects(effects);
        if resync {
            self.request_resync();
        }
        next
    }

    fn on_baseline(&self, st: &mut State, baseline: &Baseline, effects: &mut Effects) {
        tracing::info!(
            channel = %self.channel.channel(),
            runtime_epoch = %baseline.runtime_epoch,
            seq_base = baseline.seq_base,
            "sync baseline established"
        );
        st.runtime_epoch = Some(baseline.runtime_epoch.clone());
        st.seq_base = baseline.seq_base;
        st.last_seq = baseline.seq_base;
        st.resync_required = false;
        st.failures.reset();
        st.cancel_retry();
        st.set_mode(SyncMode::Healthy);

        let outage = std::mem::take(&mut st.outage_notified);
        let restart = std::mem::take(&mut st.restart_pending);
        if outage || restart {
            effects.notices.push(NoticeAction::Clear);
        }
    }

    fn on_failure(self: &Arc<Self>, st: &mut State, failure: &HandshakeFailure, effects: &mut Effects) {
        let now = self.clock.now();
        let streak = st.failures.record(now, self.config.failure_window);
        let connected = self.channel.is_connected();
        st.resync_required = true;
        st.set_mode(if connected {
            SyncMode::Degraded
        } else {
            SyncMode::Disconnected
        });

        tracing::warn!(
            channel = %self.channel.channel(),
            code = failure.code(),
            error = %failure,
            consecutive = streak,
            "handshake failed"
        );

        if connected && st.queued.is_none() {
            self.schedule_retry(st);
        }

        let threshold = self.config.failure_threshold;
        if streak >= threshold {
            if !st.outage_notified {
                st.outage_notified = true;
                effects.notices.push(NoticeAction::Show(self.outage_notice(st.restart_pending)));
            }
            if connected && st.failures.claim_reconnect(now, threshold, self.config.reconnect_cooldown) {
                effects.force_reconnect = true;
            }
        }
    }

    fn outage_notice(&self, restart_pending: bool) -> Notice {
        let (level, message) = if restart_pending {
            (NoticeLevel::Info, "Server is restarting. Reconnecting...")
        } else {
            (NoticeLevel::Error, "Connection to the server is unstable. Retrying in the background.")
        };
        Notice {
            group: self.config.notice_group.clone(),
            level,
            message: message.to_owned(),
        }
    }

    fn schedule_retry(self: &Arc<Self>, st: &mut State) {
        if st.retry.is_some() {
            return;
        }
        let delay = self.config.retry.delay_for(st.retry_attempt);
        st.retry_attempt = st.retry_attempt.saturating_add(1);
        tracing::debug!(
            attempt = st.retry_attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling handshake retry"
        );

        let weak = Arc::downgrade(self);
        let generation = st.generation;
        st.retry = Some(self.scheduler.schedule(
            delay,
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let current = {
                    let mut st = inner.state.lock();
                    st.retry = None;
                    st.generation == generation
                };
                if current && inner.channel.is_connected() {
                    let _ = inner.send_state_request(true).await;
                }
            }),
        ));
    }

    fn run_effects(&self, effects: Effects) {
        for action in effects.notices {
            match action {
                NoticeAction::Show(notice) => self.notifier.notify(notice),
                NoticeAction::Clear => self.notifier.clear(&self.config.notice_group),
            }
        }

        if effects.force_reconnect {
            tracing::warn!(
                channel = %self.channel.channel(),
                threshold = self.config.failure_threshold,
                "forcing transport reconnect after repeated handshake failures"
            );
            let channel = self.channel.clone();
            drop(self.scheduler.schedule(
                Duration::ZERO,
                Box::pin(async move {
                    channel.disconnect().await;
                    if let Err(e) = channel.connect().await {
                        tracing::warn!(channel = %channel.channel(), error = %e, "forced reconnect failed");
                    }
                }),
            ));
        }
    }

    fn switch_context(self: &Arc<Self>, context_id: Option<String>) -> HandshakeTicket {
        let view = {
            let mut st = self.state.lock();
            tracing::info!(from = ?st.context_id, to = ?context_id, "switching sync context");
            st.context_id = context_id;
            st.generation += 1;
            st.runtime_epoch = None;
            st.seq_base = 0;
            st.last_seq = 0;
            st.resync_required = true;
            st.cancel_retry();
            st.set_mode(SyncMode::HandshakePending);
            st.dirty = true;
            self.commit(&mut st)
        };
        self.publish(view);
        self.send_state_request(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Channel events
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_connect(self: &Arc<Self>, info: &ConnectInfo) {
        tracing::info!(
            channel = %info.channel,
            first_connect = info.first_connect,
            server_identity_changed = info.server_identity_changed,
            "link up; requesting full state"
        );
        self.state.lock().resync_required = true;
        self.request_resync();
    }

    fn handle_disconnect(&self, info: &DisconnectInfo) {
        let (queued, view) = {
            let mut st = self.state.lock();
            st.generation += 1;
            st.resync_required = true;
            st.cancel_retry();
            st.set_mode(SyncMode::Disconnected);
            let queued = st.queued.take();
            st.dirty = true;
            (queued, self.commit(&mut st))
        };
        tracing::info!(
            channel = %info.channel,
            client_initiated = info.client_initiated,
            reason = %info.reason,
            "link down; sync suspended"
        );
        self.publish(view);
        if let Some(queued) = queued {
            let _ = queued.tx.send(Err(HandshakeFailure::Superseded));
        }
    }

    fn handle_push(self: &Arc<Self>, data: &JsonObject) {
        let apply_guard = self.apply_lock.lock();

        let (accepted, resync, view) = {
            let mut st = self.state.lock();
            if !st.mode.accepts_pushes() {
                tracing::debug!(mode = %st.mode, "ignoring push outside healthy mode");
                return;
            }

            let accepted = match StatePush::parse(data) {
                Err(e) => {
                    tracing::warn!(error = ?e, "malformed push; forcing resync");
                    None
                }
                Ok(push) if st.runtime_epoch.as_deref() != Some(push.runtime_epoch.as_str()) => {
                    tracing::warn!(
                        expected = ?st.runtime_epoch,
                        received = %push.runtime_epoch,
                        "push from another runtime epoch; forcing resync"
                    );
                    None
                }
                Ok(push) if st.last_seq.checked_add(1) != Some(push.seq) => {
                    tracing::warn!(
                        last_seq = st.last_seq,
                        received = push.seq,
                        "push sequence gap; forcing resync"
                    );
                    None
                }
                Ok(push) => {
                    st.last_seq = push.seq;
                    st.dirty = true;
                    Some(push.snapshot)
                }
            };

            let resync = accepted.is_none();
            if resync {
                st.resync_required = true;
                st.set_mode(SyncMode::HandshakePending);
            }
            (accepted, resync, self.commit(&mut st))
        };

        let applier_resync = accepted.map_or(false, |snapshot| self.apply(&snapshot, SnapshotSource::Push));
        drop(apply_guard);

        self.publish(view);
        if resync || applier_resync {
            self.request_resync();
        }
    }

    fn handle_server_restart(&self, data: &JsonObject) {
        let runtime_id = restart_runtime_id(data);
        tracing::info!(runtime_id = ?runtime_id, "server announced restart");

        let view = {
            let mut st = self.state.lock();
            st.announced_restart = runtime_id;
            st.restart_pending = true;
            st.dirty = true;
            self.commit(&mut st)
        };
        self.publish(view);

        self.notifier.notify(Notice {
            group: self.config.notice_group.clone(),
            level: NoticeLevel::Info,
            message: "Server is restarting. Reconnecting shortly.".into(),
        });
    }

    /// Hand `snapshot` to the applier. Returns whether it asked for a resync.
    fn apply(&self, snapshot: &JsonObject, source: SnapshotSource) -> bool {
        let ctx = ApplyContext::new(source);
        let changed = self.applier.apply_snapshot(snapshot, &ctx);
        tracing::trace!(source = ?source, changed, "snapshot applied");
        if ctx.resync_requested() {
            tracing::warn!(source = ?source, "applier requested resync");
        }
        ctx.resync_requested()
    }
}
