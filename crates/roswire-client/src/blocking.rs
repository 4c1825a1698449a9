//! Synchronous façade over the async engine.
//!
//! [`Ros`](struct@Ros) here owns a multi-thread Tokio runtime; the I/O
//! loop runs on its worker threads while every blocking method suspends
//! only the calling thread. Dropping the handle tears the runtime (and
//! with it the session task and socket) down, so opening and closing N
//! sessions leaves no background threads behind.
//!
//! Use this from plain synchronous code; async code should use
//! [`crate::Ros`] directly.

use crate::client;
use crate::config::ConnectionOptions;
use roswire_types::{RosError, Time};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Blocking session handle.
pub struct Ros {
    handle: client::Ros,
    runtime: Runtime,
}

impl Ros {
    /// Create the runtime and the session handle; no I/O yet.
    pub fn new(opts: ConnectionOptions) -> Result<Self, RosError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("roswire-io")
            .enable_all()
            .build()
            .map_err(|e| RosError::ConnectionFailed(format!("failed to start runtime: {e}")))?;
        let handle = client::Ros::new(opts);
        Ok(Self { handle, runtime })
    }

    /// Connect and wait for readiness; returns once the session is
    /// usable, while the I/O loop keeps running in the background.
    ///
    /// # Errors
    ///
    /// [`RosError::NotReady`] when the readiness wait (the configured
    /// `default_timeout`, 10 s by default) expires.
    pub fn run(&self) -> Result<(), RosError> {
        self.runtime.block_on(self.handle.run())
    }

    /// Connect and block the calling thread until the session is closed
    /// from another thread (or the retry budget runs out).
    pub fn run_forever(&self) {
        self.runtime.block_on(self.handle.run_forever())
    }

    /// The underlying async handle, for wiring up topics, services and
    /// action clients.
    pub fn handle(&self) -> &client::Ros {
        &self.handle
    }

    /// Run any engine future to completion on the session runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Gracefully close the session; reconnection stops.
    pub fn close(&self) {
        self.runtime.block_on(self.handle.close());
    }

    /// Close and consume the handle, shutting the runtime down.
    pub fn terminate(self) {
        self.close();
        // Give in-flight tasks a bounded window to unwind.
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }

    fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.handle.options().default_timeout)
    }

    // ── Blocking request/reply operations ────────────────────────────────

    /// Call a service and wait for the response.
    pub fn call_service(
        &self,
        service: &str,
        service_type: &str,
        request: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RosError> {
        let deadline = self.timeout_or_default(timeout);
        let service = crate::Service::new(&self.handle, service, service_type);
        self.runtime
            .block_on(service.call_with_timeout(request, deadline))
    }

    pub fn get_param(&self, name: &str) -> Result<Value, RosError> {
        self.runtime.block_on(self.handle.get_param(name))
    }

    pub fn set_param(&self, name: &str, value: &Value) -> Result<(), RosError> {
        self.runtime.block_on(self.handle.set_param(name, value))
    }

    pub fn delete_param(&self, name: &str) -> Result<(), RosError> {
        self.runtime.block_on(self.handle.delete_param(name))
    }

    pub fn params(&self) -> Result<Vec<String>, RosError> {
        self.runtime.block_on(self.handle.params())
    }

    pub fn topics(&self) -> Result<Vec<String>, RosError> {
        self.runtime.block_on(self.handle.topics())
    }

    pub fn topic_type(&self, topic: &str) -> Result<String, RosError> {
        self.runtime.block_on(self.handle.topic_type(topic))
    }

    pub fn topics_for_type(&self, topic_type: &str) -> Result<Vec<String>, RosError> {
        self.runtime
            .block_on(self.handle.topics_for_type(topic_type))
    }

    pub fn services(&self) -> Result<Vec<String>, RosError> {
        self.runtime.block_on(self.handle.services())
    }

    pub fn service_type(&self, service: &str) -> Result<String, RosError> {
        self.runtime.block_on(self.handle.service_type(service))
    }

    pub fn services_for_type(&self, service_type: &str) -> Result<Vec<String>, RosError> {
        self.runtime
            .block_on(self.handle.services_for_type(service_type))
    }

    pub fn message_details(&self, message_type: &str) -> Result<Value, RosError> {
        self.runtime
            .block_on(self.handle.message_details(message_type))
    }

    pub fn service_request_details(&self, service_type: &str) -> Result<Value, RosError> {
        self.runtime
            .block_on(self.handle.service_request_details(service_type))
    }

    pub fn service_response_details(&self, service_type: &str) -> Result<Value, RosError> {
        self.runtime
            .block_on(self.handle.service_response_details(service_type))
    }

    pub fn nodes(&self) -> Result<Vec<String>, RosError> {
        self.runtime.block_on(self.handle.nodes())
    }

    pub fn node_details(&self, node: &str) -> Result<Value, RosError> {
        self.runtime.block_on(self.handle.node_details(node))
    }

    pub fn get_time(&self) -> Result<Time, RosError> {
        self.runtime.block_on(self.handle.get_time())
    }
}
