//! Actionlib client: goal handles over the five action topics.
//!
//! The client advertises `<name>/goal` and `<name>/cancel` and subscribes
//! to `<name>/status`, `<name>/feedback` and `<name>/result`, translating
//! that topic traffic into per-goal state. A goal is **terminal** only
//! when both a result message has been observed *and* its latest status
//! is in the terminal set; either one alone is not enough.

use crate::client::Ros;
use crate::event::{EventEmitter, ListenerId};
use crate::topic::Topic;
use roswire_types::{GoalStatus, RosError, Time};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

type GoalMap = Arc<Mutex<HashMap<String, Arc<GoalState>>>>;

pub(crate) struct GoalState {
    goal_id: String,
    events: EventEmitter,
    status: Mutex<Option<GoalStatus>>,
    result: Mutex<Option<Value>>,
    feedback: Mutex<Option<Value>>,
    finished_tx: watch::Sender<bool>,
}

impl GoalState {
    fn new(goal_id: String) -> Arc<Self> {
        let (finished_tx, _) = watch::channel(false);
        Arc::new(Self {
            goal_id,
            events: EventEmitter::new(),
            status: Mutex::new(None),
            result: Mutex::new(None),
            feedback: Mutex::new(None),
            finished_tx,
        })
    }

    fn apply_status(&self, status: &Value) {
        let Some(code) = status.get("status").and_then(Value::as_u64) else {
            return;
        };
        let Some(parsed) = GoalStatus::from_code(code as u8) else {
            debug!(goal_id = %self.goal_id, code, "unknown goal status code");
            return;
        };
        *lock(&self.status) = Some(parsed);
        self.events.emit("status", status);
        self.maybe_finish();
    }

    fn apply_feedback(&self, feedback: &Value) {
        *lock(&self.feedback) = Some(feedback.clone());
        self.events.emit("feedback", feedback);
    }

    fn apply_result(&self, result: &Value) {
        *lock(&self.result) = Some(result.clone());
        self.events.emit("result", result);
        self.maybe_finish();
    }

    fn maybe_finish(&self) {
        let has_result = lock(&self.result).is_some();
        let terminal = lock(&self.status).map(|s| s.is_terminal()).unwrap_or(false);
        if has_result && terminal {
            self.finished_tx.send_replace(true);
        }
    }
}

/// Client for one ROS action server.
#[derive(Clone)]
pub struct ActionClient {
    inner: Arc<ActionClientInner>,
}

struct ActionClientInner {
    server_name: String,
    action_type: String,
    goals: GoalMap,
    goal_topic: Topic,
    cancel_topic: Topic,
    status_topic: Topic,
    feedback_topic: Topic,
    result_topic: Topic,
}

impl ActionClient {
    /// Wire up the five action topics for `server_name`.
    ///
    /// `action_type` is the base action message name, e.g.
    /// `actionlib_tutorials/Fibonacci`; the per-topic suffixes (`Goal`,
    /// `ActionFeedback`, …) are derived from it.
    pub fn new(ros: &Ros, server_name: impl Into<String>, action_type: impl Into<String>) -> Self {
        let server_name = server_name.into();
        let action_type = action_type.into();
        let goals: GoalMap = Arc::new(Mutex::new(HashMap::new()));

        let goal_topic = Topic::new(
            ros,
            format!("{server_name}/goal"),
            format!("{action_type}ActionGoal"),
        );
        let cancel_topic = Topic::new(ros, format!("{server_name}/cancel"), "actionlib_msgs/GoalID");
        let status_topic = Topic::new(
            ros,
            format!("{server_name}/status"),
            "actionlib_msgs/GoalStatusArray",
        );
        let feedback_topic = Topic::new(
            ros,
            format!("{server_name}/feedback"),
            format!("{action_type}ActionFeedback"),
        );
        let result_topic = Topic::new(
            ros,
            format!("{server_name}/result"),
            format!("{action_type}ActionResult"),
        );

        goal_topic.advertise();
        cancel_topic.advertise();

        let map = Arc::clone(&goals);
        status_topic.subscribe(move |msg| {
            let Some(status_list) = msg.get("status_list").and_then(Value::as_array) else {
                return;
            };
            for status in status_list {
                if let Some(goal) = goal_for(&map, status) {
                    goal.apply_status(status);
                }
            }
        });

        let map = Arc::clone(&goals);
        feedback_topic.subscribe(move |msg| {
            let Some(status) = msg.get("status") else {
                return;
            };
            if let Some(goal) = goal_for(&map, status) {
                goal.apply_status(status);
                if let Some(feedback) = msg.get("feedback") {
                    goal.apply_feedback(feedback);
                }
            }
        });

        let map = Arc::clone(&goals);
        result_topic.subscribe(move |msg| {
            let Some(status) = msg.get("status") else {
                return;
            };
            if let Some(goal) = goal_for(&map, status) {
                goal.apply_status(status);
                let result = msg.get("result").cloned().unwrap_or(Value::Null);
                goal.apply_result(&result);
            }
        });

        Self {
            inner: Arc::new(ActionClientInner {
                server_name,
                action_type,
                goals,
                goal_topic,
                cancel_topic,
                status_topic,
                feedback_topic,
                result_topic,
            }),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    pub fn action_type(&self) -> &str {
        &self.inner.action_type
    }

    /// Send a goal message and return its handle.
    pub fn send_goal(&self, goal: Value) -> Goal {
        let goal_id = format!("goal_{}", Uuid::new_v4());
        let state = GoalState::new(goal_id.clone());
        lock(&self.inner.goals).insert(goal_id.clone(), Arc::clone(&state));

        self.inner.goal_topic.publish(json!({
            "goal_id": {
                "stamp": Time::default(),
                "id": goal_id,
            },
            "goal": goal,
        }));

        Goal {
            client: Arc::clone(&self.inner),
            state,
        }
    }

    /// Request cancellation of one goal. Unknown ids are a no-op;
    /// repeating a cancel is harmless.
    pub fn cancel_goal(&self, goal_id: &str) {
        if !lock(&self.inner.goals).contains_key(goal_id) {
            debug!(goal_id, "cancel for unknown goal ignored");
            return;
        }
        self.inner.cancel_topic.publish(json!({
            "stamp": Time::default(),
            "id": goal_id,
        }));
    }

    /// Cancel every goal of this action server (empty catch-all GoalID).
    pub fn cancel_all(&self) {
        self.inner.cancel_topic.publish(json!({
            "stamp": Time::default(),
            "id": "",
        }));
    }

    /// Release all five topics.
    pub fn dispose(&self) {
        self.inner.goal_topic.unadvertise();
        self.inner.cancel_topic.unadvertise();
        self.inner.status_topic.unsubscribe();
        self.inner.feedback_topic.unsubscribe();
        self.inner.result_topic.unsubscribe();
    }
}

fn goal_for(map: &GoalMap, status: &Value) -> Option<Arc<GoalState>> {
    let id = status.get("goal_id")?.get("id")?.as_str()?;
    lock(map).get(id).cloned()
}

/// Handle to one in-flight (or finished) goal.
#[derive(Clone)]
pub struct Goal {
    client: Arc<ActionClientInner>,
    state: Arc<GoalState>,
}

impl Goal {
    pub fn id(&self) -> &str {
        &self.state.goal_id
    }

    /// Most recently observed status.
    pub fn status(&self) -> Option<GoalStatus> {
        *lock(&self.state.status)
    }

    /// Result payload, once observed.
    pub fn result(&self) -> Option<Value> {
        lock(&self.state.result).clone()
    }

    /// Most recent feedback payload.
    pub fn latest_feedback(&self) -> Option<Value> {
        lock(&self.state.feedback).clone()
    }

    /// Terminal per the actionlib contract: a result has arrived *and*
    /// the latest status is terminal.
    pub fn is_finished(&self) -> bool {
        *self.state.finished_tx.borrow()
    }

    /// Listen for status updates (raw `GoalStatus` values).
    pub fn on_status(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.state.events.on("status", listener)
    }

    /// Listen for feedback messages.
    pub fn on_feedback(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.state.events.on("feedback", listener)
    }

    /// Listen for the result message.
    pub fn on_result(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.state.events.on("result", listener)
    }

    /// Await terminality and return the result payload.
    pub async fn wait_result(&self) -> Result<Value, RosError> {
        let mut finished = self.state.finished_tx.subscribe();
        loop {
            if *finished.borrow_and_update() {
                break;
            }
            if finished.changed().await.is_err() {
                return Err(RosError::ConnectionLost("goal tracking dropped".into()));
            }
        }
        lock(&self.state.result)
            .clone()
            .ok_or_else(|| RosError::ConnectionLost("goal finished without result".into()))
    }

    /// Await terminality with a deadline.
    pub async fn wait_result_timeout(&self, timeout: Duration) -> Result<Value, RosError> {
        tokio::time::timeout(timeout, self.wait_result())
            .await
            .map_err(|_| RosError::Timeout(timeout))?
    }

    /// Publish a cancel request for this goal. Idempotent.
    pub fn cancel(&self) {
        self.client.cancel_topic.publish(json!({
            "stamp": Time::default(),
            "id": self.state.goal_id,
        }));
    }
}
