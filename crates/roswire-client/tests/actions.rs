//! Actionlib end-to-end: a real client session and a real simple action
//! server session, bridged by the mock rosbridge's topic routing.

mod common;

use async_trait::async_trait;
use common::MockBridge;
use roswire_client::action::{ActionClient, ActionHandler, GoalContext, SimpleActionServer};
use roswire_client::{ConnectionOptions, GoalStatus, Ros};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn connect(bridge: &MockBridge) -> Ros {
    let ros = Ros::new(
        ConnectionOptions::new(bridge.host())
            .with_port(bridge.port())
            .with_initial_delay(Duration::from_millis(50))
            .with_default_timeout(Duration::from_secs(5)),
    );
    ros.run().await.expect("session must become ready");
    ros
}

/// The actionlib_tutorials Fibonacci server: feedback after every step,
/// result once the sequence reaches `order + 1` elements.
struct Fibonacci;

#[async_trait]
impl ActionHandler for Fibonacci {
    async fn execute(&self, goal: GoalContext) {
        let order = goal.goal()["order"].as_u64().unwrap_or(0) as usize;
        let mut sequence: Vec<u64> = vec![0, 1];
        for i in 1..order {
            if goal.is_preempt_requested() {
                goal.set_preempted();
                return;
            }
            goal.publish_feedback(json!({"sequence": sequence}));
            sequence.push(sequence[i] + sequence[i - 1]);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        goal.set_succeeded(json!({"sequence": sequence}));
    }
}

/// Spins until preempted; used for cancellation tests.
struct Patient;

#[async_trait]
impl ActionHandler for Patient {
    async fn execute(&self, goal: GoalContext) {
        while !goal.is_preempt_requested() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        goal.set_preempted();
    }
}

#[tokio::test]
async fn fibonacci_goal_feedback_and_result() {
    let bridge = MockBridge::start().await;
    let server_session = connect(&bridge).await;
    let client_session = connect(&bridge).await;

    let server = SimpleActionServer::new(
        &server_session,
        "/fibonacci",
        "actionlib_tutorials/Fibonacci",
    );
    server.start(Fibonacci);

    let client = ActionClient::new(
        &client_session,
        "/fibonacci",
        "actionlib_tutorials/Fibonacci",
    );
    // Both ends must be fully wired before the goal goes out.
    bridge
        .wait_for(
            |frames| {
                frames
                    .iter()
                    .filter(|f| f["op"] == "subscribe" && f["topic"] == "/fibonacci/goal")
                    .count()
                    == 1
                    && frames
                        .iter()
                        .filter(|f| f["op"] == "subscribe" && f["topic"] == "/fibonacci/result")
                        .count()
                        == 1
            },
            "action topology",
        )
        .await;

    let feedback = Arc::new(Mutex::new(Vec::<Value>::new()));
    let goal = client.send_goal(json!({"order": 5}));
    let sink = Arc::clone(&feedback);
    goal.on_feedback(move |fb| {
        sink.lock().unwrap().push(fb["sequence"].clone());
    });

    let result = goal
        .wait_result_timeout(Duration::from_secs(5))
        .await
        .expect("fibonacci result");
    assert_eq!(result["sequence"], json!([0, 1, 1, 2, 3, 5]));
    assert_eq!(goal.status(), Some(GoalStatus::Succeeded));
    assert!(goal.is_finished());

    let feedback = feedback.lock().unwrap().clone();
    assert_eq!(
        feedback,
        vec![
            json!([0, 1]),
            json!([0, 1, 1]),
            json!([0, 1, 1, 2]),
            json!([0, 1, 1, 2, 3]),
        ]
    );

    client.dispose();
    server.shutdown();
    server_session.close().await;
    client_session.close().await;
}

#[tokio::test]
async fn cancel_preempts_and_is_idempotent() {
    let bridge = MockBridge::start().await;
    let server_session = connect(&bridge).await;
    let client_session = connect(&bridge).await;

    let server = SimpleActionServer::new(&server_session, "/patient", "test_msgs/Patient");
    server.start(Patient);
    let client = ActionClient::new(&client_session, "/patient", "test_msgs/Patient");
    bridge
        .wait_for(
            |frames| {
                frames
                    .iter()
                    .any(|f| f["op"] == "subscribe" && f["topic"] == "/patient/goal")
                    && frames
                        .iter()
                        .any(|f| f["op"] == "subscribe" && f["topic"] == "/patient/result")
            },
            "action topology",
        )
        .await;

    let goal = client.send_goal(json!({}));
    bridge
        .wait_for(
            |frames| {
                frames
                    .iter()
                    .any(|f| f["op"] == "publish" && f["topic"] == "/patient/goal")
            },
            "goal delivery",
        )
        .await;

    goal.cancel();
    goal.wait_result_timeout(Duration::from_secs(5))
        .await
        .expect("preempted goals still deliver a result");
    assert_eq!(goal.status(), Some(GoalStatus::Preempted));

    // A second cancel changes nothing.
    goal.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(goal.status(), Some(GoalStatus::Preempted));
    assert!(goal.is_finished());

    client.dispose();
    server.shutdown();
    server_session.close().await;
    client_session.close().await;
}

#[tokio::test]
async fn second_goal_preempts_the_first() {
    let bridge = MockBridge::start().await;
    let server_session = connect(&bridge).await;
    let client_session = connect(&bridge).await;

    let server = SimpleActionServer::new(&server_session, "/patient", "test_msgs/Patient");
    server.start(Patient);
    let client = ActionClient::new(&client_session, "/patient", "test_msgs/Patient");
    bridge
        .wait_for(
            |frames| {
                frames
                    .iter()
                    .any(|f| f["op"] == "subscribe" && f["topic"] == "/patient/goal")
                    && frames
                        .iter()
                        .any(|f| f["op"] == "subscribe" && f["topic"] == "/patient/result")
            },
            "action topology",
        )
        .await;

    let first = client.send_goal(json!({"n": 1}));
    bridge
        .wait_for(
            |frames| {
                frames
                    .iter()
                    .any(|f| f["op"] == "publish" && f["topic"] == "/patient/goal")
            },
            "first goal delivery",
        )
        .await;
    let second = client.send_goal(json!({"n": 2}));

    // The first goal yields with PREEMPTED once the second arrives.
    first
        .wait_result_timeout(Duration::from_secs(5))
        .await
        .expect("first goal result");
    assert_eq!(first.status(), Some(GoalStatus::Preempted));

    // The second becomes active; cancel it to finish the test.
    second.cancel();
    second
        .wait_result_timeout(Duration::from_secs(5))
        .await
        .expect("second goal result");
    assert_eq!(second.status(), Some(GoalStatus::Preempted));

    client.dispose();
    server.shutdown();
    server_session.close().await;
    client_session.close().await;
}
