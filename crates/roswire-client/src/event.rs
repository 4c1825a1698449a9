//! Named-event bus with persistent and one-shot listeners.
//!
//! The session uses this both internally (lifecycle routing) and as its
//! public observation surface: `connecting`, `connection`, `ready`,
//! `close`, `closing`, `error`, `status` and `status:<id>` all fire here.
//!
//! Delivery is synchronous in the emitting thread. A panicking listener is
//! caught and reported via the `error` event; the remaining listeners for
//! the same emission still run.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`EventEmitter::on`] / [`EventEmitter::once`], used
/// to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Thread-safe named-event emitter. Clone it cheaply – all clones share
/// the same listener table.
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

#[derive(Default)]
struct EmitterInner {
    events: Mutex<HashMap<String, Vec<Entry>>>,
    seq: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent listener for `event`.
    pub fn on(&self, event: &str, listener: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.add(event, false, Arc::new(listener))
    }

    /// Register a listener that is removed after its first invocation.
    pub fn once(
        &self,
        event: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add(event, true, Arc::new(listener))
    }

    fn add(&self, event: &str, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.seq.fetch_add(1, Ordering::Relaxed));
        let mut events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
        events
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    /// Remove a single listener from `event`. Unknown ids are a no-op.
    pub fn off(&self, event: &str, id: ListenerId) {
        let mut events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = events.get_mut(event) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                events.remove(event);
            }
        }
    }

    /// Remove every listener attached to `event`.
    pub fn remove_all(&self, event: &str) {
        let mut events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
        events.remove(event);
    }

    /// Number of listeners currently attached to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        let events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
        events.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Fire `event`, delivering `payload` to every attached listener in
    /// registration order. One-shot listeners are removed before delivery
    /// so they never fire twice even if re-entrant.
    pub fn emit(&self, event: &str, payload: &Value) {
        let listeners: Vec<Listener> = {
            let mut events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entries) = events.get_mut(event) else {
                return;
            };
            let collected = entries.iter().map(|e| Arc::clone(&e.listener)).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                events.remove(event);
            }
            collected
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                error!(event, "listener panicked");
                if event != "error" {
                    self.emit(
                        "error",
                        &json!({"kind": "callback", "event": event, "message": "listener panicked"}),
                    );
                }
            }
        }
    }
}
