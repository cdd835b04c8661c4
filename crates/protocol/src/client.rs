//! Client → Server messages

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Instance;

/// Variables filled in by the operator, keyed by parameter name
pub type Variables = BTreeMap<String, String>;

/// `POST /admin/operation-to-run`: prepare a configured operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub name: String,
    pub variables: Variables,
}

/// Kind of project-scoped request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRequestType {
    /// Use the server's default project
    Get,
    /// Validate an operator supplied project name
    Validate,
    /// Run the configured pre-RDP operations
    PreRdp,
}

/// `POST /admin/get-project` and `POST /admin/pre-rdp`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRequest {
    #[serde(rename = "type")]
    pub request_type: ProjectRequestType,
    pub project_name: String,
    pub variables: Variables,
}

/// `POST /admin/instance-operation-to-run`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOperationRequest {
    pub name: String,
    pub instance: Instance,
    pub variables: Variables,
}

/// `POST /gcloud/compute-instances`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInstancesRequest {
    pub project: String,
}

/// `POST /verifyidtoken`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

/// Control command written to a streaming channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    #[serde(rename = "end_operation")]
    EndOperation,
    #[serde(rename = "end")]
    EndRdp,
    #[serde(rename = "start-rdp")]
    StartRdp,
}

/// Outbound control frame on a streaming channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub cmd: ControlCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ControlMessage {
    /// Terminate a running operation addressed by its run handle
    pub fn end_operation(hash: impl Into<String>) -> Self {
        Self {
            cmd: ControlCommand::EndOperation,
            name: None,
            hash: Some(hash.into()),
            username: None,
            password: None,
        }
    }

    /// Tear down the private RDP tunnel for an instance
    pub fn end_rdp(instance_name: impl Into<String>) -> Self {
        Self {
            cmd: ControlCommand::EndRdp,
            name: Some(instance_name.into()),
            hash: None,
            username: None,
            password: None,
        }
    }

    /// Ask the server to launch its RDP program with these credentials
    pub fn start_rdp(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            cmd: ControlCommand::StartRdp,
            name: None,
            hash: None,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_messages_use_wire_command_names() {
        let end = serde_json::to_value(ControlMessage::end_operation("abc123")).unwrap();
        assert_eq!(end, json!({"cmd": "end_operation", "hash": "abc123"}));

        let end_rdp = serde_json::to_value(ControlMessage::end_rdp("vm1")).unwrap();
        assert_eq!(end_rdp, json!({"cmd": "end", "name": "vm1"}));

        let login = serde_json::to_value(ControlMessage::start_rdp("admin", "pw")).unwrap();
        assert_eq!(
            login,
            json!({"cmd": "start-rdp", "username": "admin", "password": "pw"})
        );
    }

    #[test]
    fn project_request_serializes_type_tag() {
        let req = ProjectRequest {
            request_type: ProjectRequestType::PreRdp,
            project_name: String::new(),
            variables: Variables::from([("ZONE".to_string(), "z1".to_string())]),
        };
        let value = serde_json::to_value(req).unwrap();
        assert_eq!(value["type"], "pre_rdp");
        assert_eq!(value["variables"]["ZONE"], "z1");
    }
}
