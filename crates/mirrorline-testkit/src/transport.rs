//! In-memory transport with scripted replies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use mirrorline_channel::{ServerHello, Transport, TransportError, TransportEvent, TransportSink};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

/// Computes a reply from the request envelope.
pub type Responder = Arc<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

struct ParkedCall {
    event: String,
    envelope: Value,
    tx: oneshot::Sender<Result<Value, TransportError>>,
}

#[derive(Default)]
struct MemoryState {
    open: bool,
    sink: Option<TransportSink>,
    server_identity: Option<String>,
    open_script: VecDeque<Result<ServerHello, TransportError>>,
    opens: usize,
    closes: usize,
    tokens: Vec<Option<String>>,
    listening: HashSet<String>,
    listen_calls: HashMap<String, usize>,
    sent: Vec<(String, Value)>,
    calls: Vec<(String, Value)>,
    replies: HashMap<String, VecDeque<Result<Value, TransportError>>>,
    responders: HashMap<String, Responder>,
    parked: VecDeque<ParkedCall>,
    keep_parked_on_drop: bool,
}

fn closed() -> TransportError {
    TransportError::Closed("memory link closed".into())
}

impl MemoryState {
    fn fail_parked(&mut self) {
        for call in self.parked.drain(..) {
            let _ = call.tx.send(Err(closed()));
        }
    }
}

/// A [`Transport`] living entirely in memory.
///
/// Calls are answered, in order of precedence, by a scripted reply queued
/// with [`reply_next`](Self::reply_next), a responder installed with
/// [`respond_with`](Self::respond_with), or parked until the test releases
/// them with [`release_next`](Self::release_next).
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Identity reported by successful opens.
    pub fn set_server_identity(&self, identity: impl Into<String>) {
        self.state.lock().server_identity = Some(identity.into());
    }

    /// Make the next open fail with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        self.state.lock().open_script.push_back(Err(error));
    }

    /// Queue one reply for the next call of `event`.
    pub fn reply_next(&self, event: &str, reply: Result<Value, TransportError>) {
        self.state
            .lock()
            .replies
            .entry(event.to_owned())
            .or_default()
            .push_back(reply);
    }

    /// Answer every unscripted call of `event` with `responder`.
    pub fn respond_with<F>(&self, event: &str, responder: F)
    where
        F: Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .responders
            .insert(event.to_owned(), Arc::new(responder));
    }

    /// Remove the responder for `event`; later calls park.
    pub fn clear_responder(&self, event: &str) {
        self.state.lock().responders.remove(event);
    }

    /// Answer the oldest parked call. Returns false if none was parked.
    pub fn release_next(&self, reply: Result<Value, TransportError>) -> bool {
        let parked = self.state.lock().parked.pop_front();
        match parked {
            Some(call) => {
                let _ = call.tx.send(reply);
                true
            }
            None => false,
        }
    }

    pub fn parked_count(&self) -> usize {
        self.state.lock().parked.len()
    }

    /// Event names and envelopes of the parked calls, oldest first.
    pub fn parked(&self) -> Vec<(String, Value)> {
        self.state
            .lock()
            .parked
            .iter()
            .map(|c| (c.event.clone(), c.envelope.clone()))
            .collect()
    }

    /// Deliver `payload` as `event` if the link is open and the event is listened to.
    pub fn push(&self, event: &str, payload: Value) -> bool {
        let st = self.state.lock();
        if !st.listening.contains(event) {
            return false;
        }
        match (&st.sink, st.open) {
            (Some(sink), true) => sink
                .send(TransportEvent::Delivery {
                    event: event.to_owned(),
                    payload,
                })
                .is_ok(),
            _ => false,
        }
    }

    /// Leave parked calls pending when the link drops, like a reply still
    /// in transit.
    pub fn keep_parked_on_drop(&self, keep: bool) {
        self.state.lock().keep_parked_on_drop = keep;
    }

    /// Simulate the server dropping the link.
    ///
    /// Parked calls fail with a closed-link error unless
    /// [`keep_parked_on_drop`](Self::keep_parked_on_drop) is set.
    pub fn drop_link(&self, reason: &str) {
        let mut st = self.state.lock();
        st.open = false;
        if !st.keep_parked_on_drop {
            st.fail_parked();
        }
        if let Some(sink) = st.sink.take() {
            let _ = sink.send(TransportEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
    }

    /// Report a non-fatal error on the open link.
    pub fn report_error(&self, message: &str) {
        if let Some(sink) = &self.state.lock().sink {
            let _ = sink.send(TransportEvent::Error {
                message: message.to_owned(),
            });
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// Tokens presented by each open, in order.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.state.lock().tokens.clone()
    }

    pub fn is_listening(&self, event: &str) -> bool {
        self.state.lock().listening.contains(event)
    }

    /// How many times `listen` attached `event`.
    pub fn listen_count(&self, event: &str) -> usize {
        self.state.lock().listen_calls.get(event).copied().unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.state.lock().sent.clone()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().calls.clone()
    }

    /// Envelopes of every call of `event`, oldest first.
    pub fn calls_for(&self, event: &str) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(e, _)| e == event)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Yield until `cond` holds. Panics if it never does.
    pub async fn wait_until<F>(&self, mut cond: F)
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..10_000 {
            if cond(self) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached on memory transport");
    }

    pub async fn wait_for_calls(&self, count: usize) {
        self.wait_until(|t| t.calls().len() >= count).await;
    }

    pub async fn wait_for_parked(&self, count: usize) {
        self.wait_until(|t| t.parked_count() >= count).await;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        _channel: &str,
        token: Option<&str>,
        sink: TransportSink,
    ) -> Result<ServerHello, TransportError> {
        let mut st = self.state.lock();
        st.opens += 1;
        st.tokens.push(token.map(str::to_owned));

        let scripted = st.open_script.pop_front();
        let hello = match scripted {
            Some(Err(e)) => return Err(e),
            Some(Ok(hello)) => hello,
            None => ServerHello {
                server_identity: st.server_identity.clone(),
            },
        };
        st.open = true;
        st.sink = Some(sink);
        Ok(hello)
    }

    async fn close(&self) {
        let mut st = self.state.lock();
        st.open = false;
        st.sink = None;
        st.closes += 1;
        st.fail_parked();
    }

    async fn send(&self, event: &str, envelope: Value) -> Result<(), TransportError> {
        let mut st = self.state.lock();
        if !st.open {
            return Err(closed());
        }
        st.sent.push((event.to_owned(), envelope));
        Ok(())
    }

    async fn call(&self, event: &str, envelope: Value) -> Result<Value, TransportError> {
        let rx = {
            let mut st = self.state.lock();
            if !st.open {
                return Err(closed());
            }
            st.calls.push((event.to_owned(), envelope.clone()));

            if let Some(reply) = st.replies.get_mut(event).and_then(VecDeque::pop_front) {
                return reply;
            }
            if let Some(responder) = st.responders.get(event).cloned() {
                drop(st);
                return responder(&envelope);
            }

            let (tx, rx) = oneshot::channel();
            st.parked.push_back(ParkedCall {
                event: event.to_owned(),
                envelope,
                tx,
            });
            rx
        };
        rx.await.unwrap_or_else(|_| Err(closed()))
    }

    fn listen(&self, event: &str) {
        let mut st = self.state.lock();
        if st.listening.insert(event.to_owned()) {
            *st.listen_calls.entry(event.to_owned()).or_default() += 1;
        }
    }

    fn unlisten(&self, event: &str) {
        self.state.lock().listening.remove(event);
    }
}
