//! Meta-queries against the rosapi node.
//!
//! Thin wrappers over [`Service`] calls to the standard `/rosapi/*`
//! services: list topics and services, resolve types, inspect message
//! definitions, walk the parameter server. Every method uses the
//! session's `default_timeout`.

use crate::client::Ros;
use crate::param::Param;
use crate::service::Service;
use roswire_types::{RosError, Time};
use serde_json::{json, Value};

fn string_array(result: &Value, field: &str) -> Result<Vec<String>, RosError> {
    result
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .ok_or_else(|| RosError::InvalidFrame(format!("rosapi response without {field}")))
}

fn string_field(result: &Value, field: &str) -> Result<String, RosError> {
    result
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RosError::InvalidFrame(format!("rosapi response without {field}")))
}

impl Ros {
    async fn rosapi(&self, service: &str, service_type: &str, args: Value) -> Result<Value, RosError> {
        Service::new(self, service, service_type)
            .call_with_timeout(args, self.default_timeout())
            .await
    }

    /// List of topic names active in the graph.
    pub async fn topics(&self) -> Result<Vec<String>, RosError> {
        let result = self.rosapi("/rosapi/topics", "rosapi/Topics", json!({})).await?;
        string_array(&result, "topics")
    }

    /// Message type of a topic.
    pub async fn topic_type(&self, topic: &str) -> Result<String, RosError> {
        let result = self
            .rosapi("/rosapi/topic_type", "rosapi/TopicType", json!({"topic": topic}))
            .await?;
        string_field(&result, "type")
    }

    /// Topics carrying the given message type.
    pub async fn topics_for_type(&self, topic_type: &str) -> Result<Vec<String>, RosError> {
        let result = self
            .rosapi(
                "/rosapi/topics_for_type",
                "rosapi/TopicsForType",
                json!({"type": topic_type}),
            )
            .await?;
        string_array(&result, "topics")
    }

    /// List of active service names.
    pub async fn services(&self) -> Result<Vec<String>, RosError> {
        let result = self
            .rosapi("/rosapi/services", "rosapi/Services", json!({}))
            .await?;
        string_array(&result, "services")
    }

    /// Type of a service.
    pub async fn service_type(&self, service: &str) -> Result<String, RosError> {
        let result = self
            .rosapi(
                "/rosapi/service_type",
                "rosapi/ServiceType",
                json!({"service": service}),
            )
            .await?;
        string_field(&result, "type")
    }

    /// Services of the given type.
    pub async fn services_for_type(&self, service_type: &str) -> Result<Vec<String>, RosError> {
        let result = self
            .rosapi(
                "/rosapi/services_for_type",
                "rosapi/ServicesForType",
                json!({"type": service_type}),
            )
            .await?;
        string_array(&result, "services")
    }

    /// Full field layout of a message type (`typedefs` payload).
    pub async fn message_details(&self, message_type: &str) -> Result<Value, RosError> {
        self.rosapi(
            "/rosapi/message_details",
            "rosapi/MessageDetails",
            json!({"type": message_type}),
        )
        .await
    }

    /// Field layout of a service request.
    pub async fn service_request_details(&self, service_type: &str) -> Result<Value, RosError> {
        self.rosapi(
            "/rosapi/service_request_details",
            "rosapi/ServiceRequestDetails",
            json!({"type": service_type}),
        )
        .await
    }

    /// Field layout of a service response.
    pub async fn service_response_details(&self, service_type: &str) -> Result<Value, RosError> {
        self.rosapi(
            "/rosapi/service_response_details",
            "rosapi/ServiceResponseDetails",
            json!({"type": service_type}),
        )
        .await
    }

    /// Names on the parameter server.
    pub async fn params(&self) -> Result<Vec<String>, RosError> {
        let result = self
            .rosapi("/rosapi/get_param_names", "rosapi/GetParamNames", json!({}))
            .await?;
        string_array(&result, "names")
    }

    /// Get one parameter value.
    pub async fn get_param(&self, name: &str) -> Result<Value, RosError> {
        Param::new(self, name).get().await
    }

    /// Set one parameter value.
    pub async fn set_param(&self, name: &str, value: &Value) -> Result<(), RosError> {
        Param::new(self, name).set(value).await
    }

    /// Delete one parameter.
    pub async fn delete_param(&self, name: &str) -> Result<(), RosError> {
        Param::new(self, name).delete().await
    }

    /// Current ROS time.
    pub async fn get_time(&self) -> Result<Time, RosError> {
        let result = self
            .rosapi("/rosapi/get_time", "rosapi/GetTime", json!({}))
            .await?;
        let time = result
            .get("time")
            .ok_or_else(|| RosError::InvalidFrame("get_time response without time".into()))?;
        let secs = time.get("secs").and_then(Value::as_u64);
        let nsecs = time.get("nsecs").and_then(Value::as_u64);
        match (secs, nsecs) {
            (Some(secs), Some(nsecs)) => Ok(Time::new(secs as u32, nsecs as u32)),
            _ => Err(RosError::InvalidFrame(
                "get_time stamp components must be integers".into(),
            )),
        }
    }

    /// Names of active nodes.
    pub async fn nodes(&self) -> Result<Vec<String>, RosError> {
        let result = self.rosapi("/rosapi/nodes", "rosapi/Nodes", json!({})).await?;
        string_array(&result, "nodes")
    }

    /// Topics and services touched by one node
    /// (`services` / `subscribing` / `publishing`).
    pub async fn node_details(&self, node: &str) -> Result<Value, RosError> {
        self.rosapi("/rosapi/node_details", "rosapi/NodeDetails", json!({"node": node}))
            .await
    }

    /// Names of running action servers.
    pub async fn action_servers(&self) -> Result<Vec<String>, RosError> {
        let result = self
            .rosapi(
                "/rosapi/action_servers",
                "rosapi/GetActionServers",
                json!({}),
            )
            .await?;
        string_array(&result, "action_servers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{dispatch, SessionState};
    use crate::config::ConnectionOptions;

    fn ready_ros() -> (Ros, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let ros = Ros::new(ConnectionOptions::new("localhost"));
        let rx = ros.take_outgoing_for_test();
        ros.inner_for_test().set_state(SessionState::Ready);
        (ros, rx)
    }

    #[tokio::test]
    async fn topics_unwraps_the_string_array() {
        let (ros, mut rx) = ready_ros();
        let topics = ros.topics();
        tokio::pin!(topics);
        assert!(futures_util::poll!(topics.as_mut()).is_pending());

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["service"], "/rosapi/topics");
        dispatch(
            &ros.inner_for_test(),
            &json!({
                "op": "service_response",
                "id": frame["id"],
                "result": true,
                "values": {"topics": ["/chatter", "/rosout"], "types": ["std_msgs/String", "rosgraph_msgs/Log"]},
            })
            .to_string(),
        );
        assert_eq!(topics.await.unwrap(), vec!["/chatter", "/rosout"]);
    }

    #[tokio::test]
    async fn get_time_requires_integer_components() {
        let (ros, mut rx) = ready_ros();
        let time = ros.get_time();
        tokio::pin!(time);
        assert!(futures_util::poll!(time.as_mut()).is_pending());

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        dispatch(
            &ros.inner_for_test(),
            &json!({
                "op": "service_response",
                "id": frame["id"],
                "result": true,
                "values": {"time": {"secs": 100, "nsecs": 42}},
            })
            .to_string(),
        );
        let t = time.await.unwrap();
        assert_eq!(t, Time::new(100, 42));
    }

    #[tokio::test]
    async fn malformed_rosapi_answer_is_invalid_frame() {
        let (ros, mut rx) = ready_ros();
        let services = ros.services();
        tokio::pin!(services);
        assert!(futures_util::poll!(services.as_mut()).is_pending());

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        dispatch(
            &ros.inner_for_test(),
            &json!({
                "op": "service_response",
                "id": frame["id"],
                "result": true,
                "values": {"unexpected": 1},
            })
            .to_string(),
        );
        assert!(matches!(services.await, Err(RosError::InvalidFrame(_))));
    }
}
