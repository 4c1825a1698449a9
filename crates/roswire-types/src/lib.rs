//! `roswire-types` – wire value types shared by the roswire crates.
//!
//! rosbridge payloads are untyped JSON mappings; this crate deliberately
//! stays schema-free and only provides the handful of value types the
//! protocol itself cares about:
//!
//! - [`Time`] / [`Header`] – the two `std_msgs` values the engine must
//!   serialize with integer fields.
//! - [`GoalStatus`] – the actionlib goal status lattice.
//! - [`RosError`] – the error taxonomy spanning transport, protocol and
//!   callback failures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// ROS time: seconds since epoch plus nanoseconds since the second.
///
/// Both components are unsigned integers; rosbridge peers reject float
/// stamps, so this type is the only way the engine puts time on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Time {
    pub secs: u32,
    pub nsecs: u32,
}

impl Time {
    /// Create a new time value.
    pub fn new(secs: u32, nsecs: u32) -> Self {
        Self { secs, nsecs }
    }

    /// Current system time (not ROS time).
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp().max(0) as u32,
            nsecs: now.timestamp_subsec_nanos(),
        }
    }

    /// Build from a float seconds representation.
    pub fn from_sec(float_secs: f64) -> Self {
        let secs = float_secs.max(0.0) as u32;
        let nsecs = ((float_secs - secs as f64) * 1e9).max(0.0) as u32;
        Self { secs, nsecs }
    }

    /// Time as nanoseconds from epoch.
    pub fn to_nsec(&self) -> u64 {
        self.secs as u64 * 1_000_000_000 + self.nsecs as u64
    }

    /// Time as float seconds.
    pub fn to_sec(&self) -> f64 {
        self.secs as f64 + self.nsecs as f64 / 1e9
    }

    /// `true` when both components are zero.
    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.nsecs == 0
    }
}

/// A `std_msgs/Header` value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    /// Header stamped with the current system time.
    pub fn stamped_now(frame_id: impl Into<String>) -> Self {
        Self {
            seq: 0,
            stamp: Time::now(),
            frame_id: frame_id.into(),
        }
    }
}

/// Goal status codes from `actionlib_msgs/GoalStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalStatus {
    Pending,
    Active,
    Preempted,
    Succeeded,
    Aborted,
    Rejected,
    Preempting,
    Recalling,
    Recalled,
    Lost,
}

impl GoalStatus {
    /// Decode a wire status code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Active),
            2 => Some(Self::Preempted),
            3 => Some(Self::Succeeded),
            4 => Some(Self::Aborted),
            5 => Some(Self::Rejected),
            6 => Some(Self::Preempting),
            7 => Some(Self::Recalling),
            8 => Some(Self::Recalled),
            9 => Some(Self::Lost),
            _ => None,
        }
    }

    /// The wire status code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Preempted => 2,
            Self::Succeeded => 3,
            Self::Aborted => 4,
            Self::Rejected => 5,
            Self::Preempting => 6,
            Self::Recalling => 7,
            Self::Recalled => 8,
            Self::Lost => 9,
        }
    }

    /// `true` for states a goal can never leave.
    ///
    /// Terminality of a *goal* additionally requires that a result message
    /// has been observed; a terminal status alone is not enough.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Preempted
                | Self::Succeeded
                | Self::Aborted
                | Self::Rejected
                | Self::Recalled
                | Self::Lost
        )
    }
}

/// Errors spanning transport failures, protocol violations and user
/// callback misbehavior.
#[derive(Error, Debug)]
pub enum RosError {
    /// The transport refused to open.
    #[error("failed to connect to rosbridge: {0}")]
    ConnectionFailed(String),

    /// The transport closed while operations were in flight.
    #[error("connection to rosbridge lost: {0}")]
    ConnectionLost(String),

    /// The readiness wait of a `run` call expired.
    #[error("rosbridge session not ready within {0:?}")]
    NotReady(Duration),

    /// A per-operation deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered a service call with `result: false`.
    #[error("service call failed: {values}")]
    ServiceFailed { values: Value },

    /// Malformed inbound frame; logged and dropped, never fatal.
    #[error("invalid rosbridge frame: {0}")]
    InvalidFrame(String),

    /// A user callback panicked; surfaced via the `error` event.
    #[error("callback failed: {0}")]
    CallbackError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn time_serializes_to_integer_fields() {
        let t = Time::new(1_700_000_000, 250_000_000);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, json!({"secs": 1_700_000_000u32, "nsecs": 250_000_000u32}));
        assert!(json["secs"].is_u64(), "secs must be an integer on the wire");
        assert!(json["nsecs"].is_u64(), "nsecs must be an integer on the wire");
    }

    #[test]
    fn time_from_sec_splits_components() {
        let t = Time::from_sec(2.5);
        assert_eq!(t.secs, 2);
        assert_eq!(t.nsecs, 500_000_000);
        assert!((t.to_sec() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn time_to_nsec_roundtrip() {
        let t = Time::new(3, 7);
        assert_eq!(t.to_nsec(), 3_000_000_007);
        assert!(!t.is_zero());
        assert!(Time::default().is_zero());
    }

    #[test]
    fn header_roundtrip() {
        let h = Header {
            seq: 42,
            stamp: Time::new(100, 200),
            frame_id: "base_link".to_string(),
        };
        let json = serde_json::to_string(&h).unwrap();
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn goal_status_codes_roundtrip() {
        for code in 0..=9u8 {
            let status = GoalStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(GoalStatus::from_code(10).is_none());
    }

    #[test]
    fn terminal_set_matches_actionlib() {
        use GoalStatus::*;
        for status in [Preempted, Succeeded, Aborted, Rejected, Recalled, Lost] {
            assert!(status.is_terminal(), "{status:?} must be terminal");
        }
        for status in [Pending, Active, Preempting, Recalling] {
            assert!(!status.is_terminal(), "{status:?} must not be terminal");
        }
    }

    #[test]
    fn service_failed_carries_values() {
        let err = RosError::ServiceFailed {
            values: json!({"reason": "no such service"}),
        };
        assert!(err.to_string().contains("no such service"));
    }
}
