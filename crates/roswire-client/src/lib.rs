//! `roswire-client` – client engine for the rosbridge v2 WebSocket protocol.
//!
//! A [`Ros`] session speaks JSON frames over a single WebSocket to a
//! rosbridge server and multiplexes every logical stream (topics, services
//! in both directions, action goals, parameter queries) over that one
//! socket, correlating replies by opcode and request id.
//!
//! # Modules
//!
//! - [`client`] – the [`Ros`] session handle and the frame multiplexer.
//! - [`connection`] – the I/O loop: connect, authenticate, reconnect with
//!   exponential backoff, reissue subscriptions on every `ready`.
//! - [`event`] – named-event bus used for session lifecycle observation.
//! - [`topic`] – publish/subscribe handles with refcounted server
//!   subscriptions.
//! - [`service`] – service client calls and hosted service servers.
//! - [`param`] – parameter server accessors over the rosapi services.
//! - [`rosapi`] – meta-queries (list topics, resolve types, …).
//! - [`action`] – actionlib client and simple action server, layered on
//!   five coordinated topics per action name.
//! - [`blocking`] – synchronous façade owning its own Tokio runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use roswire_client::{ConnectionOptions, Ros, RosError, Topic};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RosError> {
//!     let ros = Ros::new(ConnectionOptions::new("localhost"));
//!     ros.run().await?;
//!
//!     let chatter = Topic::new(&ros, "/chatter", "std_msgs/String");
//!     chatter.publish(json!({"data": "hello"}));
//!
//!     ros.close().await;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod blocking;
pub mod client;
pub mod config;
pub mod connection;
pub mod event;
pub mod ids;
pub mod param;
pub mod rosapi;
pub mod service;
pub mod topic;
pub mod transport;

pub use client::{Ros, SessionState};
pub use config::{AuthCredentials, ConnectionOptions};
pub use event::{EventEmitter, ListenerId};
pub use param::Param;
pub use service::Service;
pub use topic::{Compression, Topic, TopicOptions};

pub use roswire_types::{GoalStatus, Header, RosError, Time};
