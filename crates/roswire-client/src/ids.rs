//! Monotonic per-session correlation id allocator.
//!
//! Ids take the form `<stream-kind>:<name>:<n>` (e.g.
//! `call_service:/rosout/get_loggers:7`). The prefix is informational;
//! only uniqueness within the session matters, which the shared counter
//! guarantees across every stream kind.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IdAllocator {
    counter: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for the given stream kind and name.
    pub fn next(&self, kind: &str, name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{kind}:{name}:{n}")
    }
}
