//! Server → Client messages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ready-to-run payload returned when an operation is prepared.
///
/// The whole payload is sent back as the opening frame of the operation
/// channel, so fields the client does not know about are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparedOperation {
    #[serde(default)]
    pub operation: String,
    /// Run handle used to address control messages
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "RealtimeOutput", default)]
    pub realtime_output: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response to a project request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectResponse {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response to `POST /verifyidtoken`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTokenResponse {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response to `GET /health`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
}

/// Application error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Inbound frame on a streaming channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    #[serde(default, alias = "messsage")]
    pub message: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: String,
}

impl OutputMessage {
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Pull an application error out of a JSON body, if it carries one
pub fn application_error(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(Value::as_str)
        .filter(|err| !err.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prepared_operation_round_trips_unknown_fields() {
        let raw = json!({
            "operation": "gcloud compute instances reset vm1",
            "hash": "f00d",
            "status": "ready",
            "RealtimeOutput": true,
            "label_hint": "reset"
        });
        let prepared: PreparedOperation = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(prepared.hash, "f00d");
        assert!(prepared.realtime_output);
        assert_eq!(serde_json::to_value(&prepared).unwrap(), raw);
    }

    #[test]
    fn output_message_accepts_misspelled_message_key() {
        let msg: OutputMessage =
            serde_json::from_str(r#"{"messsage": "Ready for command", "error": ""}"#).unwrap();
        assert_eq!(msg.message, "Ready for command");
        assert!(!msg.has_error());
    }

    #[test]
    fn application_error_ignores_empty_strings() {
        assert_eq!(application_error(&json!({"error": ""})), None);
        assert_eq!(
            application_error(&json!({"error": "auth error"})).as_deref(),
            Some("auth error")
        );
        assert_eq!(application_error(&json!([1, 2])), None);
    }
}
