//! Publish/subscribe topic handles.
//!
//! Several handles may exist for the same topic name; the session keeps a
//! single server-side subscription (and a single advertisement) per name
//! and refcounts the local attachments, so the server never sees more
//! than one `subscribe`/`advertise` at a time for a given topic.

use crate::client::Ros;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Per-stream wire encoding. Only `none` ships a codec; `png` and `cbor`
/// are accepted so a custom transport can negotiate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Png,
    Cbor,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Png => "png",
            Self::Cbor => "cbor",
        }
    }
}

/// Tuning knobs of a [`Topic`].
#[derive(Debug, Clone)]
pub struct TopicOptions {
    /// Wire encoding requested in the `subscribe` frame.
    pub compression: Compression,
    /// Server-side rate limit in milliseconds between messages.
    pub throttle_rate: u32,
    /// Bridge-side queue size used when publishing.
    pub queue_size: u32,
    /// Bridge-side queue length used when subscribing.
    pub queue_length: u32,
    /// Latch the topic when publishing.
    pub latch: bool,
    /// Re-register this topic transparently after a reconnect.
    pub reconnect_on_close: bool,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            throttle_rate: 0,
            queue_size: 100,
            queue_length: 0,
            latch: false,
            reconnect_on_close: true,
        }
    }
}

/// Handle for publishing and/or subscribing to one ROS topic.
///
/// # Example
///
/// ```rust,no_run
/// # use roswire_client::{ConnectionOptions, Ros, Topic};
/// # use serde_json::json;
/// # async fn example() {
/// let ros = Ros::new(ConnectionOptions::new("localhost"));
/// let chatter = Topic::new(&ros, "/chatter", "std_msgs/String");
/// chatter.subscribe(|msg| println!("heard: {}", msg["data"]));
/// chatter.publish(json!({"data": "hello"}));
/// # }
/// ```
pub struct Topic {
    ros: Ros,
    name: String,
    message_type: String,
    opts: TopicOptions,
    listener_ids: Mutex<Vec<u64>>,
    advertised: AtomicBool,
}

impl Topic {
    pub fn new(ros: &Ros, name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::with_options(ros, name, message_type, TopicOptions::default())
    }

    pub fn with_options(
        ros: &Ros,
        name: impl Into<String>,
        message_type: impl Into<String>,
        opts: TopicOptions,
    ) -> Self {
        Self {
            ros: ros.clone(),
            name: name.into(),
            message_type: message_type.into(),
            opts,
            listener_ids: Mutex::new(Vec::new()),
            advertised: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// `true` if this handle has at least one attached subscriber callback.
    pub fn is_subscribed(&self) -> bool {
        !self.listener_ids.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// `true` if this handle is registered as a publisher.
    pub fn is_advertised(&self) -> bool {
        self.advertised.load(Ordering::SeqCst)
    }

    /// Attach a subscriber callback.
    ///
    /// The first local subscriber for this topic name sends the
    /// `subscribe` frame; additional callbacks share the existing
    /// server-side subscription.
    pub fn subscribe(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        let listener_id = self.ros.add_subscriber(
            &self.name,
            |id| {
                json!({
                    "op": "subscribe",
                    "id": id,
                    "type": self.message_type,
                    "topic": self.name,
                    "compression": self.opts.compression.as_str(),
                    "throttle_rate": self.opts.throttle_rate,
                    "queue_length": self.opts.queue_length,
                })
            },
            self.opts.reconnect_on_close,
            std::sync::Arc::new(callback),
        );
        self.listener_ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener_id);
    }

    /// Detach every callback attached through this handle. When the last
    /// local subscriber for the topic name goes away, `unsubscribe` is
    /// sent with the original correlation id.
    pub fn unsubscribe(&self) {
        let ids: Vec<u64> = self
            .listener_ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for listener_id in ids {
            self.ros.remove_subscriber(&self.name, listener_id);
        }
    }

    /// Register as a publisher. Publishing implies this, so calling it
    /// explicitly is only needed to advertise before the first message.
    pub fn advertise(&self) {
        if self.advertised.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ros.add_advertiser(
            &self.name,
            |id| {
                json!({
                    "op": "advertise",
                    "id": id,
                    "type": self.message_type,
                    "topic": self.name,
                    "latch": self.opts.latch,
                    "queue_size": self.opts.queue_size,
                })
            },
            self.opts.reconnect_on_close,
        );
    }

    /// Publish one message, advertising first if needed.
    pub fn publish(&self, msg: Value) {
        self.advertise();
        self.ros.publish_message(&self.name, &msg, self.opts.latch);
    }

    /// Explicitly release the publisher registration.
    pub fn unadvertise(&self) {
        if !self.advertised.swap(false, Ordering::SeqCst) {
            return;
        }
        self.ros.remove_advertiser(&self.name);
    }
}
