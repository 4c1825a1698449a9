//! Parameter server accessors.
//!
//! A [`Param`] binds a name to the three standard rosapi parameter
//! services. Values cross the wire JSON-encoded inside the `value` string
//! field, mirroring what rosapi expects; an empty string reads back as
//! `null` (rosapi's answer for a missing key).

use crate::client::Ros;
use crate::service::Service;
use roswire_types::RosError;
use serde_json::{json, Value};

/// Handle to one ROS parameter.
pub struct Param {
    ros: Ros,
    name: String,
}

impl Param {
    pub fn new(ros: &Ros, name: impl Into<String>) -> Self {
        Self {
            ros: ros.clone(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the current value.
    pub async fn get(&self) -> Result<Value, RosError> {
        let client = Service::new(&self.ros, "/rosapi/get_param", "rosapi/GetParam");
        let result = client
            .call_with_timeout(json!({"name": self.name}), self.ros.default_timeout())
            .await?;
        let Some(raw) = result.get("value").and_then(Value::as_str) else {
            return Err(RosError::InvalidFrame(
                "get_param response without value".into(),
            ));
        };
        if raw.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(raw)
            .map_err(|e| RosError::InvalidFrame(format!("param {} is not JSON: {e}", self.name)))
    }

    /// Set a new value.
    pub async fn set(&self, value: &Value) -> Result<(), RosError> {
        let client = Service::new(&self.ros, "/rosapi/set_param", "rosapi/SetParam");
        client
            .call_with_timeout(
                json!({"name": self.name, "value": value.to_string()}),
                self.ros.default_timeout(),
            )
            .await?;
        Ok(())
    }

    /// Delete the parameter.
    pub async fn delete(&self) -> Result<(), RosError> {
        let client = Service::new(&self.ros, "/rosapi/delete_param", "rosapi/DeleteParam");
        client
            .call_with_timeout(json!({"name": self.name}), self.ros.default_timeout())
            .await?;
        Ok(())
    }
}
