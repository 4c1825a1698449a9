//! Service client calls and hosted service servers.
//!
//! One [`Service`] handle plays either role: `call` consumes a remote
//! service, `advertise` turns the handle into a server whose callback is
//! invoked for every incoming `call_service` frame.

use crate::client::Ros;
use roswire_types::RosError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Client/server handle for one ROS service.
pub struct Service {
    ros: Ros,
    name: String,
    service_type: String,
    advertised: AtomicBool,
    reconnect_on_close: bool,
}

impl Service {
    pub fn new(ros: &Ros, name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            ros: ros.clone(),
            name: name.into(),
            service_type: service_type.into(),
            advertised: AtomicBool::new(false),
            reconnect_on_close: true,
        }
    }

    /// Disable transparent re-advertisement after a reconnect.
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_on_close = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// `true` when this handle acts as the service server.
    pub fn is_advertised(&self) -> bool {
        self.advertised.load(Ordering::SeqCst)
    }

    /// Call the service and await the response `values`.
    ///
    /// Waits indefinitely; combine with
    /// [`call_with_timeout`][Self::call_with_timeout] for a deadline.
    ///
    /// # Errors
    ///
    /// [`RosError::ServiceFailed`] when the peer answers `result: false`
    /// (the error carries the peer's `values` payload);
    /// [`RosError::ConnectionLost`] when the socket drops while the call
    /// is in flight.
    pub async fn call(&self, request: Value) -> Result<Value, RosError> {
        self.ros.call_service_raw(&self.name, request, None).await
    }

    /// Call with a deadline; on expiry the pending entry is removed and
    /// [`RosError::Timeout`] is returned.
    pub async fn call_with_timeout(
        &self,
        request: Value,
        timeout: Duration,
    ) -> Result<Value, RosError> {
        self.ros
            .call_service_raw(&self.name, request, Some(timeout))
            .await
    }

    /// Start serving this service.
    ///
    /// The handler runs synchronously on the I/O task for every incoming
    /// request; its `Ok` payload becomes the `service_response` `values`
    /// with `result: true`, any `Err` (or panic) becomes `result: false`
    /// with empty values.
    ///
    /// Advertising twice is a no-op.
    pub fn advertise(
        &self,
        handler: impl Fn(Value) -> Result<Value, RosError> + Send + Sync + 'static,
    ) {
        if self.advertised.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ros.add_service_server(
            &self.name,
            &self.service_type,
            Arc::new(handler),
            self.reconnect_on_close,
        );
    }

    /// Stop serving; sends `unadvertise_service`.
    pub fn unadvertise(&self) {
        if !self.advertised.swap(false, Ordering::SeqCst) {
            return;
        }
        self.ros.remove_service_server(&self.name);
    }
}
