//! Messages between the background coordinator and its pages
//! (popup, RDP tab, console content script).

use serde::{Deserialize, Serialize};

use crate::types::Instance;

/// Requests a page sends to the background coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackgroundRequest {
    /// Popup asks for the current directory
    #[serde(rename = "popup-get-instances")]
    PopupGetInstances,
    /// Popup asks to open a private RDP tab for an instance
    #[serde(rename = "start-private-rdp")]
    StartPrivateRdp { instance: Instance },
    /// A freshly opened RDP tab asks which instance it serves
    #[serde(rename = "rdp-get-instance")]
    RdpGetInstance,
    /// An RDP tab reports its session ended
    #[serde(rename = "rdpEnded")]
    RdpEnded { instance: Instance },
}

/// Replies from the background coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackgroundResponse {
    Instances {
        instances: Vec<Instance>,
        #[serde(rename = "projectName", default, skip_serializing_if = "Option::is_none")]
        project_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Instance {
        instance: Instance,
    },
    Ack {
        ok: bool,
    },
}

/// Pushes from the background coordinator to the console content script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentMessage {
    #[serde(rename = "get-compute-instances")]
    ComputeInstances {
        #[serde(rename = "computeInstances")]
        compute_instances: Vec<Instance>,
    },
}
