//! The [`Ros`] session handle and the protocol multiplexer.
//!
//! One `Ros` = one rosbridge endpoint. The handle is a cheap clone over a
//! shared inner state that owns:
//!
//! - the outgoing frame queue drained by the I/O loop,
//! - the pending-request table keyed by correlation id,
//! - the refcounted subscriber/advertiser/service-server registries,
//! - the resubscription intents reissued on every `ready`,
//! - the [`EventEmitter`] lifecycle surface.
//!
//! Incoming frames are routed here by `op`: `publish` to subscriber
//! callbacks, `service_response` to the matching pending entry,
//! `call_service` to the advertised handler, `status` onto the event bus.
//! Malformed or unknown frames are logged and dropped; they never
//! terminate the session.

use crate::config::ConnectionOptions;
use crate::connection;
use crate::event::EventEmitter;
use crate::ids::IdAllocator;
use roswire_types::RosError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

pub(crate) type TopicCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type ServiceHandler = Arc<dyn Fn(Value) -> Result<Value, RosError> + Send + Sync>;

/// Lifecycle states of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport; either never started or between reconnect attempts.
    Closed,
    /// A connection attempt is in flight.
    Opening,
    /// The transport is open but the handshake is not finished.
    Open,
    /// The session is usable; frames flow in both directions.
    Ready,
    /// A graceful shutdown is in progress.
    Closing,
}

pub(crate) struct PendingRequest {
    pub(crate) op: &'static str,
    pub(crate) tx: oneshot::Sender<Result<Value, RosError>>,
}

pub(crate) struct Subscription {
    pub(crate) id: String,
    pub(crate) listeners: HashMap<u64, TopicCallback>,
}

pub(crate) struct Advertisement {
    pub(crate) id: String,
    pub(crate) count: usize,
}

/// Key identifying a resubscription intent for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IntentKey {
    Subscribe(String),
    Advertise(String),
    AdvertiseService(String),
}

struct FragmentBuffer {
    parts: Vec<Option<String>>,
    received: usize,
}

pub(crate) struct ClientInner {
    pub(crate) opts: ConnectionOptions,
    pub(crate) events: EventEmitter,
    pub(crate) ids: IdAllocator,
    pub(crate) state_tx: watch::Sender<SessionState>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) outgoing_tx: mpsc::UnboundedSender<String>,
    pub(crate) outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    pub(crate) pending: Mutex<HashMap<String, PendingRequest>>,
    pub(crate) subscriptions: Mutex<HashMap<String, Subscription>>,
    pub(crate) advertisements: Mutex<HashMap<String, Advertisement>>,
    pub(crate) service_servers: Mutex<HashMap<String, ServiceHandler>>,
    intents: Mutex<Vec<(IntentKey, Value)>>,
    fragments: Mutex<HashMap<String, FragmentBuffer>>,
    listener_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ClientInner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Atomically mark the session ready and snapshot the intents that the
    /// I/O loop must reissue. Holding the intents lock across the state
    /// flip guarantees a concurrent registration is either in the snapshot
    /// or enqueued by its caller, never both.
    pub(crate) fn mark_ready_and_collect_intents(&self) -> Vec<String> {
        let intents = lock(&self.intents);
        self.state_tx.send_replace(SessionState::Ready);
        intents.iter().map(|(_, frame)| frame.to_string()).collect()
    }

    /// Record an intent; returns `true` when the caller must also send the
    /// frame now because the session is already ready.
    fn register_intent(&self, key: IntentKey, frame: Value) -> bool {
        let mut intents = lock(&self.intents);
        intents.push((key, frame));
        *self.state_tx.borrow() == SessionState::Ready
    }

    fn remove_intent(&self, key: &IntentKey) {
        lock(&self.intents).retain(|(k, _)| k != key);
    }

    pub(crate) fn enqueue(&self, frame: &Value) {
        // The session loop holds the only receiver; failure means the
        // session terminated and the frame can be dropped.
        let _ = self.outgoing_tx.send(frame.to_string());
    }

    /// Fail every outstanding pending entry.
    pub(crate) fn fail_pending(&self, reason: &str) {
        let drained: Vec<(String, PendingRequest)> = lock(&self.pending).drain().collect();
        for (id, request) in drained {
            debug!(%id, op = request.op, "failing in-flight request: {reason}");
            let _ = request
                .tx
                .send(Err(RosError::ConnectionLost(reason.to_string())));
        }
    }
}

/// Handle to a rosbridge session. Clone it cheaply; all clones drive the
/// same connection.
#[derive(Clone)]
pub struct Ros {
    inner: Arc<ClientInner>,
}

impl Ros {
    /// Create a session handle. No I/O happens until [`run`][Self::run] or
    /// [`run_forever`][Self::run_forever].
    pub fn new(opts: ConnectionOptions) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Closed);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                opts,
                events: EventEmitter::new(),
                ids: IdAllocator::new(),
                state_tx,
                shutdown_tx,
                outgoing_tx,
                outgoing_rx: Mutex::new(Some(outgoing_rx)),
                pending: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                advertisements: Mutex::new(HashMap::new()),
                service_servers: Mutex::new(HashMap::new()),
                intents: Mutex::new(Vec::new()),
                fragments: Mutex::new(HashMap::new()),
                listener_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Spawn the I/O loop onto the ambient Tokio runtime and wait for the
    /// session to become ready.
    ///
    /// # Errors
    ///
    /// [`RosError::NotReady`] when the readiness wait (the configured
    /// `default_timeout`) expires; the session keeps retrying in the
    /// background until [`close`][Self::close].
    pub async fn run(&self) -> Result<(), RosError> {
        tokio::spawn(connection::session_loop(Arc::clone(&self.inner)));
        self.wait_ready(self.inner.opts.default_timeout).await
    }

    /// Drive the I/O loop on the current task until the session is closed.
    ///
    /// Other clones of the handle stay usable from other tasks while this
    /// runs.
    pub async fn run_forever(&self) {
        connection::session_loop(Arc::clone(&self.inner)).await;
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), RosError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let wait = async {
            loop {
                if *state_rx.borrow_and_update() == SessionState::Ready {
                    return true;
                }
                // The session loop gave up (or the user closed): no point
                // waiting out the timeout.
                if *shutdown_rx.borrow_and_update() {
                    return false;
                }
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                    _ = shutdown_rx.changed() => {}
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(RosError::NotReady(timeout)),
        }
    }

    /// `true` while the session is ready for traffic.
    pub fn is_connected(&self) -> bool {
        self.inner.state() == SessionState::Ready
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Configured options.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.opts
    }

    /// Gracefully close the session and stop reconnecting.
    ///
    /// The `closing` event fires first, synchronously, so handlers can
    /// schedule final publishes; those frames are flushed before the
    /// WebSocket close handshake.
    pub async fn close(&self) {
        self.inner.events.emit("closing", &Value::Null);
        self.inner.shutdown_tx.send_replace(true);

        let mut state_rx = self.inner.state_tx.subscribe();
        let wait = async {
            loop {
                if *state_rx.borrow_and_update() == SessionState::Closed {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(self.inner.opts.default_timeout, wait)
            .await
            .is_err()
        {
            warn!("close handshake timed out; tearing the session down");
            self.inner.set_state(SessionState::Closed);
        }
    }

    // ── Event bus surface ────────────────────────────────────────────────

    /// Attach a persistent listener to a named session event
    /// (`connecting`, `connection`, `ready`, `close`, `closing`, `error`,
    /// `status`, `status:<id>`).
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> crate::event::ListenerId {
        self.inner.events.on(event, listener)
    }

    /// Attach a one-shot listener.
    pub fn once(
        &self,
        event: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> crate::event::ListenerId {
        self.inner.events.once(event, listener)
    }

    /// Remove a listener.
    pub fn off(&self, event: &str, id: crate::event::ListenerId) {
        self.inner.events.off(event, id)
    }

    /// Fire a named event on the session bus.
    pub fn emit(&self, event: &str, payload: &Value) {
        self.inner.events.emit(event, payload)
    }

    /// Ask the server to change its status message level
    /// (`none`, `error`, `warning`, `info`).
    pub fn set_status_level(&self, level: &str) {
        let id = self.inner.ids.next("set_level", level);
        self.inner
            .enqueue(&json!({"op": "set_level", "level": level, "id": id}));
    }

    // ── Multiplexer internals (used by Topic / Service / actions) ───────

    pub(crate) fn next_id(&self, kind: &str, name: &str) -> String {
        self.inner.ids.next(kind, name)
    }

    pub(crate) fn send_frame(&self, frame: &Value) {
        self.inner.enqueue(frame);
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.inner.opts.default_timeout
    }

    /// Attach a subscriber callback for `topic`. The first local
    /// subscriber creates the single server-side subscription; later ones
    /// only attach. Returns the listener handle for
    /// [`remove_subscriber`][Self::remove_subscriber].
    pub(crate) fn add_subscriber(
        &self,
        topic: &str,
        build_frame: impl FnOnce(&str) -> Value,
        reconnect: bool,
        callback: TopicCallback,
    ) -> u64 {
        let listener_id = self.inner.listener_seq.fetch_add(1, Ordering::Relaxed);
        let mut subs = lock(&self.inner.subscriptions);
        match subs.get_mut(topic) {
            Some(subscription) => {
                subscription.listeners.insert(listener_id, callback);
            }
            None => {
                let id = self.next_id("subscribe", topic);
                let frame = build_frame(&id);
                let mut listeners = HashMap::new();
                listeners.insert(listener_id, callback);
                subs.insert(topic.to_string(), Subscription { id, listeners });

                let deliver_now = if reconnect {
                    self.inner
                        .register_intent(IntentKey::Subscribe(topic.to_string()), frame.clone())
                } else {
                    self.inner.state() == SessionState::Ready
                };
                if deliver_now {
                    self.inner.enqueue(&frame);
                }
            }
        }
        listener_id
    }

    /// Detach one subscriber callback; the last one sends `unsubscribe`
    /// with the original correlation id.
    pub(crate) fn remove_subscriber(&self, topic: &str, listener_id: u64) {
        let mut subs = lock(&self.inner.subscriptions);
        let Some(subscription) = subs.get_mut(topic) else {
            return;
        };
        subscription.listeners.remove(&listener_id);
        if !subscription.listeners.is_empty() {
            return;
        }
        let id = subscription.id.clone();
        subs.remove(topic);
        drop(subs);

        self.inner.remove_intent(&IntentKey::Subscribe(topic.to_string()));
        if self.inner.state() == SessionState::Ready {
            self.inner
                .enqueue(&json!({"op": "unsubscribe", "id": id, "topic": topic}));
        }
    }

    /// Refcounted `advertise`: only the first publisher per topic name
    /// sends the frame.
    pub(crate) fn add_advertiser(
        &self,
        topic: &str,
        build_frame: impl FnOnce(&str) -> Value,
        reconnect: bool,
    ) {
        let mut ads = lock(&self.inner.advertisements);
        match ads.get_mut(topic) {
            Some(advertisement) => advertisement.count += 1,
            None => {
                let id = self.next_id("advertise", topic);
                let frame = build_frame(&id);
                ads.insert(topic.to_string(), Advertisement { id, count: 1 });

                let deliver_now = if reconnect {
                    self.inner
                        .register_intent(IntentKey::Advertise(topic.to_string()), frame.clone())
                } else {
                    self.inner.state() == SessionState::Ready
                };
                if deliver_now {
                    self.inner.enqueue(&frame);
                }
            }
        }
    }

    pub(crate) fn remove_advertiser(&self, topic: &str) {
        let mut ads = lock(&self.inner.advertisements);
        let Some(advertisement) = ads.get_mut(topic) else {
            return;
        };
        advertisement.count -= 1;
        if advertisement.count > 0 {
            return;
        }
        let id = advertisement.id.clone();
        ads.remove(topic);
        drop(ads);

        self.inner.remove_intent(&IntentKey::Advertise(topic.to_string()));
        if self.inner.state() == SessionState::Ready {
            self.inner
                .enqueue(&json!({"op": "unadvertise", "id": id, "topic": topic}));
        }
    }

    pub(crate) fn publish_message(&self, topic: &str, msg: &Value, latch: bool) {
        let id = self.next_id("publish", topic);
        self.inner.enqueue(&json!({
            "op": "publish",
            "id": id,
            "topic": topic,
            "msg": msg,
            "latch": latch,
        }));
    }

    /// Issue a `call_service` request and await the correlated
    /// `service_response`.
    pub(crate) async fn call_service_raw(
        &self,
        service: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RosError> {
        let id = self.next_id("call_service", service);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(
            id.clone(),
            PendingRequest {
                op: "call_service",
                tx,
            },
        );
        self.inner.enqueue(&json!({
            "op": "call_service",
            "id": id,
            "service": service,
            "args": args,
        }));

        let reply = async {
            rx.await
                .unwrap_or_else(|_| Err(RosError::ConnectionLost("session terminated".into())))
        };
        match timeout {
            None => reply.await,
            Some(deadline) => match tokio::time::timeout(deadline, reply).await {
                Ok(result) => result,
                Err(_) => {
                    lock(&self.inner.pending).remove(&id);
                    Err(RosError::Timeout(deadline))
                }
            },
        }
    }

    pub(crate) fn add_service_server(
        &self,
        service: &str,
        service_type: &str,
        handler: ServiceHandler,
        reconnect: bool,
    ) {
        lock(&self.inner.service_servers).insert(service.to_string(), handler);
        let frame = json!({
            "op": "advertise_service",
            "type": service_type,
            "service": service,
        });
        let deliver_now = if reconnect {
            self.inner
                .register_intent(IntentKey::AdvertiseService(service.to_string()), frame.clone())
        } else {
            self.inner.state() == SessionState::Ready
        };
        if deliver_now {
            self.inner.enqueue(&frame);
        }
    }

    pub(crate) fn remove_service_server(&self, service: &str) {
        if lock(&self.inner.service_servers).remove(service).is_none() {
            return;
        }
        self.inner
            .remove_intent(&IntentKey::AdvertiseService(service.to_string()));
        if self.inner.state() == SessionState::Ready {
            self.inner
                .enqueue(&json!({"op": "unadvertise_service", "service": service}));
        }
    }

    #[cfg(test)]
    pub(crate) fn take_outgoing_for_test(&self) -> mpsc::UnboundedReceiver<String> {
        lock(&self.inner.outgoing_rx)
            .take()
            .expect("outgoing queue already taken")
    }

    #[cfg(test)]
    pub(crate) fn inner_for_test(&self) -> Arc<ClientInner> {
        Arc::clone(&self.inner)
    }
}

// ── Incoming frame dispatch ──────────────────────────────────────────────

/// Route one incoming text frame. Never fails the session: malformed
/// input is logged, surfaced on the `error` event and dropped.
pub(crate) fn dispatch(inner: &Arc<ClientInner>, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            emit_error(inner, "invalid_frame", &e.to_string());
            return;
        }
    };
    let Some(op) = frame.get("op").and_then(Value::as_str) else {
        warn!("dropping frame without op field");
        emit_error(inner, "invalid_frame", "missing op field");
        return;
    };

    match op {
        "publish" => handle_publish(inner, &frame),
        "service_response" => handle_service_response(inner, frame),
        "call_service" => handle_call_service(inner, &frame),
        "status" => {
            if let Some(id) = frame.get("id").and_then(Value::as_str) {
                inner.events.emit(&format!("status:{id}"), &frame);
            }
            inner.events.emit("status", &frame);
        }
        "fragment" => handle_fragment(inner, &frame),
        "png" | "cbor" => {
            warn!(op, "no decoder registered for compressed frame");
            emit_error(inner, "unsupported_compression", op);
        }
        other => {
            warn!(op = other, "unknown op");
            emit_error(inner, "unknown_op", other);
        }
    }
}

fn emit_error(inner: &Arc<ClientInner>, kind: &str, message: &str) {
    inner
        .events
        .emit("error", &json!({"kind": kind, "message": message}));
}

fn handle_publish(inner: &Arc<ClientInner>, frame: &Value) {
    let Some(topic) = frame.get("topic").and_then(Value::as_str) else {
        emit_error(inner, "invalid_frame", "publish without topic");
        return;
    };
    let msg = frame.get("msg").cloned().unwrap_or(Value::Null);

    let listeners: Vec<TopicCallback> = {
        let subs = lock(&inner.subscriptions);
        match subs.get(topic) {
            Some(subscription) => subscription.listeners.values().cloned().collect(),
            None => {
                debug!(topic, "publish for topic without local subscribers");
                return;
            }
        }
    };
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(&msg))).is_err() {
            warn!(topic, "subscriber callback panicked");
            emit_error(inner, "callback", topic);
        }
    }
}

fn handle_service_response(inner: &Arc<ClientInner>, frame: Value) {
    let Some(id) = frame.get("id").and_then(Value::as_str) else {
        emit_error(inner, "invalid_frame", "service_response without id");
        return;
    };
    let Some(request) = lock(&inner.pending).remove(id) else {
        debug!(id, "service_response with no matching request");
        return;
    };
    let values = frame.get("values").cloned().unwrap_or(Value::Null);
    let result = match frame.get("result").and_then(Value::as_bool) {
        Some(false) => Err(RosError::ServiceFailed { values }),
        _ => Ok(values),
    };
    let _ = request.tx.send(result);
}

fn handle_call_service(inner: &Arc<ClientInner>, frame: &Value) {
    let Some(service) = frame.get("service").and_then(Value::as_str) else {
        emit_error(inner, "invalid_frame", "call_service without service");
        return;
    };
    let Some(handler) = lock(&inner.service_servers).get(service).cloned() else {
        warn!(service, "call for a service this session does not advertise");
        emit_error(inner, "unknown_service", service);
        return;
    };
    let args = frame.get("args").cloned().unwrap_or_else(|| json!({}));

    let (result, values) = match catch_unwind(AssertUnwindSafe(|| handler(args))) {
        Ok(Ok(values)) => (true, values),
        Ok(Err(e)) => {
            debug!(service, error = %e, "service handler returned an error");
            (false, json!({}))
        }
        Err(_) => {
            warn!(service, "service handler panicked");
            emit_error(inner, "callback", service);
            (false, json!({}))
        }
    };

    let mut response = json!({
        "op": "service_response",
        "service": service,
        "values": values,
        "result": result,
    });
    if let Some(id) = frame.get("id") {
        response["id"] = id.clone();
    }
    inner.enqueue(&response);
}

fn handle_fragment(inner: &Arc<ClientInner>, frame: &Value) {
    let (Some(id), Some(data), Some(num), Some(total)) = (
        frame.get("id").and_then(Value::as_str),
        frame.get("data").and_then(Value::as_str),
        frame.get("num").and_then(Value::as_u64),
        frame.get("total").and_then(Value::as_u64),
    ) else {
        emit_error(inner, "invalid_frame", "incomplete fragment");
        return;
    };
    if total == 0 || num >= total {
        emit_error(inner, "invalid_frame", "fragment index out of range");
        return;
    }

    let complete = {
        let mut fragments = lock(&inner.fragments);
        let buffer = fragments.entry(id.to_string()).or_insert_with(|| FragmentBuffer {
            parts: vec![None; total as usize],
            received: 0,
        });
        if buffer.parts.len() != total as usize {
            warn!(id, "fragment total changed mid-stream; resetting buffer");
            *buffer = FragmentBuffer {
                parts: vec![None; total as usize],
                received: 0,
            };
        }
        if buffer.parts[num as usize].is_none() {
            buffer.received += 1;
        }
        buffer.parts[num as usize] = Some(data.to_string());
        if buffer.received == buffer.parts.len() {
            fragments
                .remove(id)
                .map(|b| b.parts.into_iter().flatten().collect::<String>())
        } else {
            None
        }
    };

    if let Some(text) = complete {
        dispatch(inner, &text);
    }
}
