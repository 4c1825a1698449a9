//! Actionlib support, layered on five coordinated topics per action name:
//! `<name>/goal` and `<name>/cancel` flow client → server, `<name>/status`,
//! `<name>/feedback` and `<name>/result` flow back.
//!
//! - [`client`] – drive goals on a remote action server.
//! - [`server`] – host a simple action server with one active goal and
//!   preemption.

pub mod client;
pub mod server;

pub use client::{ActionClient, Goal};
pub use server::{ActionHandler, GoalContext, SimpleActionServer};
