//! Simple action server: one active goal, preemption, periodic status.
//!
//! Mirror image of the client's topic wiring — `<name>/goal` and
//! `<name>/cancel` are subscribed, `<name>/status`, `<name>/feedback` and
//! `<name>/result` are published. A goal arriving while another is active
//! parks in the next-goal slot and raises the preempt flag; the running
//! handler is expected to notice [`GoalContext::is_preempt_requested`] at
//! its next checkpoint and yield with [`GoalContext::set_preempted`].

use crate::client::Ros;
use crate::topic::Topic;
use async_trait::async_trait;
use roswire_types::{GoalStatus, Time};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Default cadence of the status topic.
pub const DEFAULT_STATUS_PERIOD: Duration = Duration::from_millis(100);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn stamp() -> Value {
    serde_json::to_value(Time::now()).unwrap_or(Value::Null)
}

/// User-side execution callback of a [`SimpleActionServer`].
///
/// Runs on a worker task per accepted goal. The implementation must end
/// the goal through one of the `set_*` methods on the [`GoalContext`],
/// and should poll [`GoalContext::is_preempt_requested`] at its
/// checkpoints.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    async fn execute(&self, goal: GoalContext);
}

struct CurrentGoal {
    id: String,
    status: GoalStatus,
    preempt: Arc<AtomicBool>,
}

struct ServerInner {
    server_name: String,
    goal_topic: Topic,
    cancel_topic: Topic,
    status_topic: Topic,
    feedback_topic: Topic,
    result_topic: Topic,
    current: Mutex<Option<CurrentGoal>>,
    next: Mutex<Option<Value>>,
    handler: Mutex<Option<Arc<dyn ActionHandler>>>,
    running: AtomicBool,
    status_seq: AtomicU32,
    status_period: Duration,
}

/// Action server accepting exactly one active goal at a time.
#[derive(Clone)]
pub struct SimpleActionServer {
    inner: Arc<ServerInner>,
}

impl SimpleActionServer {
    pub fn new(ros: &Ros, server_name: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self::with_status_period(ros, server_name, action_type, DEFAULT_STATUS_PERIOD)
    }

    /// Override the 10 Hz status cadence.
    pub fn with_status_period(
        ros: &Ros,
        server_name: impl Into<String>,
        action_type: impl Into<String>,
        status_period: Duration,
    ) -> Self {
        let server_name = server_name.into();
        let action_type = action_type.into();

        let inner = Arc::new(ServerInner {
            goal_topic: Topic::new(
                ros,
                format!("{server_name}/goal"),
                format!("{action_type}ActionGoal"),
            ),
            cancel_topic: Topic::new(ros, format!("{server_name}/cancel"), "actionlib_msgs/GoalID"),
            status_topic: Topic::new(
                ros,
                format!("{server_name}/status"),
                "actionlib_msgs/GoalStatusArray",
            ),
            feedback_topic: Topic::new(
                ros,
                format!("{server_name}/feedback"),
                format!("{action_type}ActionFeedback"),
            ),
            result_topic: Topic::new(
                ros,
                format!("{server_name}/result"),
                format!("{action_type}ActionResult"),
            ),
            server_name,
            current: Mutex::new(None),
            next: Mutex::new(None),
            handler: Mutex::new(None),
            running: AtomicBool::new(false),
            status_seq: AtomicU32::new(0),
            status_period,
        });
        Self { inner }
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    /// Start accepting goals.
    ///
    /// Subscribes the goal and cancel topics, advertises the outgoing
    /// three, and spawns the status ticker. Calling `start` twice is a
    /// no-op.
    pub fn start(&self, handler: impl ActionHandler) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *lock(&self.inner.handler) = Some(Arc::new(handler));

        self.inner.status_topic.advertise();
        self.inner.feedback_topic.advertise();
        self.inner.result_topic.advertise();

        let inner = Arc::clone(&self.inner);
        self.inner
            .goal_topic
            .subscribe(move |msg| ServerInner::on_goal(&inner, msg));

        let inner = Arc::clone(&self.inner);
        self.inner
            .cancel_topic
            .subscribe(move |msg| ServerInner::on_cancel(&inner, msg));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.status_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while inner.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                inner.publish_status_array();
            }
        });
    }

    /// Stop accepting goals and release the topics.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.goal_topic.unsubscribe();
        self.inner.cancel_topic.unsubscribe();
        self.inner.status_topic.unadvertise();
        self.inner.feedback_topic.unadvertise();
        self.inner.result_topic.unadvertise();
        *lock(&self.inner.handler) = None;
    }

    /// `true` while a goal is executing and a newer goal or a cancel has
    /// asked it to stop.
    pub fn is_preempt_requested(&self) -> bool {
        lock(&self.inner.current)
            .as_ref()
            .map(|goal| goal.preempt.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl ServerInner {
    fn on_goal(inner: &Arc<Self>, msg: &Value) {
        let Some(goal_id) = msg
            .get("goal_id")
            .and_then(|g| g.get("id"))
            .and_then(Value::as_str)
        else {
            warn!("goal message without goal_id.id");
            return;
        };
        let goal = msg.get("goal").cloned().unwrap_or(Value::Null);

        let start = {
            let mut current = lock(&inner.current);
            match current.as_mut() {
                Some(active) => {
                    // One active goal at a time: the newcomer waits in the
                    // next slot and the active goal is asked to yield.
                    debug!(
                        active = %active.id,
                        incoming = goal_id,
                        "parking goal and requesting preemption"
                    );
                    *lock(&inner.next) = Some(msg.clone());
                    active.preempt.store(true, Ordering::SeqCst);
                    active.status = GoalStatus::Preempting;
                    None
                }
                None => {
                    let preempt = Arc::new(AtomicBool::new(false));
                    *current = Some(CurrentGoal {
                        id: goal_id.to_string(),
                        status: GoalStatus::Active,
                        preempt: Arc::clone(&preempt),
                    });
                    Some(preempt)
                }
            }
        };

        if let Some(preempt) = start {
            inner.publish_status_array();
            let context = GoalContext {
                inner: Arc::clone(inner),
                goal_id: goal_id.to_string(),
                goal,
                preempt,
            };
            let handler = lock(&inner.handler).clone();
            if let Some(handler) = handler {
                tokio::spawn(async move { handler.execute(context).await });
            }
        }
    }

    fn on_cancel(inner: &Arc<Self>, msg: &Value) {
        let cancel_id = msg.get("id").and_then(Value::as_str).unwrap_or("");

        // Catch-all cancel also recalls the parked goal.
        let recalled_next = {
            let mut next = lock(&inner.next);
            let matches = next.as_ref().is_some_and(|parked| {
                cancel_id.is_empty() || parked["goal_id"]["id"].as_str() == Some(cancel_id)
            });
            if matches {
                next.take()
            } else {
                None
            }
        };
        if let Some(parked) = recalled_next {
            if let Some(id) = parked["goal_id"]["id"].as_str() {
                inner.publish_result(id, GoalStatus::Recalled, json!({}));
            }
        }

        let mut current = lock(&inner.current);
        if let Some(active) = current.as_mut() {
            if cancel_id.is_empty() || active.id == cancel_id {
                active.preempt.store(true, Ordering::SeqCst);
                active.status = GoalStatus::Preempting;
            }
        }
    }

    fn finish(inner: &Arc<Self>, goal_id: &str, status: GoalStatus, result: Value) {
        {
            let mut current = lock(&inner.current);
            match current.as_ref() {
                Some(active) if active.id == goal_id => {}
                _ => {
                    debug!(goal_id, "finish for a goal that is not active; ignoring");
                    return;
                }
            }
            *current = None;
        }

        inner.publish_result(goal_id, status, result);
        inner.publish_status_array();

        // Promote the parked goal, if any.
        let parked = lock(&inner.next).take();
        if let Some(msg) = parked {
            Self::on_goal(inner, &msg);
        }
    }

    fn publish_result(&self, goal_id: &str, status: GoalStatus, result: Value) {
        self.result_topic.publish(json!({
            "header": {"seq": 0, "stamp": stamp(), "frame_id": ""},
            "status": {
                "goal_id": {"stamp": stamp(), "id": goal_id},
                "status": status.code(),
            },
            "result": result,
        }));
    }

    fn publish_status_array(&self) {
        let seq = self.status_seq.fetch_add(1, Ordering::Relaxed);
        let status_list: Vec<Value> = lock(&self.current)
            .as_ref()
            .map(|goal| {
                vec![json!({
                    "goal_id": {"stamp": stamp(), "id": goal.id},
                    "status": goal.status.code(),
                    "text": "",
                })]
            })
            .unwrap_or_default();
        self.status_topic.publish(json!({
            "header": {"seq": seq, "stamp": stamp(), "frame_id": ""},
            "status_list": status_list,
        }));
    }
}

/// Execution context handed to the [`ActionHandler`] for one goal.
#[derive(Clone)]
pub struct GoalContext {
    inner: Arc<ServerInner>,
    goal_id: String,
    goal: Value,
    preempt: Arc<AtomicBool>,
}

impl GoalContext {
    pub fn goal_id(&self) -> &str {
        &self.goal_id
    }

    /// The goal payload as sent by the client.
    pub fn goal(&self) -> &Value {
        &self.goal
    }

    /// `true` once a newer goal or a cancel asked this one to stop.
    pub fn is_preempt_requested(&self) -> bool {
        self.preempt.load(Ordering::SeqCst)
    }

    /// Publish one feedback message for this goal.
    pub fn publish_feedback(&self, feedback: Value) {
        self.inner.feedback_topic.publish(json!({
            "header": {"seq": 0, "stamp": stamp(), "frame_id": ""},
            "status": {
                "goal_id": {"stamp": stamp(), "id": self.goal_id},
                "status": GoalStatus::Active.code(),
            },
            "feedback": feedback,
        }));
    }

    /// Finish successfully with a result payload.
    pub fn set_succeeded(&self, result: Value) {
        ServerInner::finish(&self.inner, &self.goal_id, GoalStatus::Succeeded, result);
    }

    /// Finish with failure.
    pub fn set_aborted(&self, result: Value) {
        ServerInner::finish(&self.inner, &self.goal_id, GoalStatus::Aborted, result);
    }

    /// Yield to a preemption request.
    pub fn set_preempted(&self) {
        ServerInner::finish(&self.inner, &self.goal_id, GoalStatus::Preempted, json!({}));
    }
}
