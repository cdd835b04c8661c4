//! Sentinel message bodies on the private RDP channel.
//!
//! The RDP channel reports progress as plain text in `OutputMessage::message`.
//! This is the one canonical set the client matches against:
//!
//! | body | match |
//! |---|---|
//! | `Ready for command` | exact |
//! | `Shutdown private RDP for <name>` | exact |
//! | `Deleting firewall for <name>` | exact |
//! | `Started IAP tunnel for <name>…: <port>` | contains, port after first `": "` |

pub const READY_FOR_COMMAND: &str = "Ready for command";
pub const SHUTDOWN_PREFIX: &str = "Shutdown private RDP for ";
pub const FIREWALL_DELETED_PREFIX: &str = "Deleting firewall for ";
pub const TUNNEL_STARTED_PREFIX: &str = "Started IAP tunnel for ";

/// What a channel message means for the instance it concerns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdpSignal {
    ReadyForCommand,
    TunnelStarted { port: String },
    FirewallDeleted,
    Shutdown,
    Other,
}

pub fn shutdown_message(instance_name: &str) -> String {
    format!("{SHUTDOWN_PREFIX}{instance_name}")
}

pub fn firewall_deleted_message(instance_name: &str) -> String {
    format!("{FIREWALL_DELETED_PREFIX}{instance_name}")
}

pub fn tunnel_started_message(instance_name: &str, port: &str) -> String {
    format!("{TUNNEL_STARTED_PREFIX}{instance_name}: {port}")
}

/// Classify a message body received while tracking `instance_name`
pub fn classify(message: &str, instance_name: &str) -> RdpSignal {
    if message == READY_FOR_COMMAND {
        return RdpSignal::ReadyForCommand;
    }
    if message == shutdown_message(instance_name) {
        return RdpSignal::Shutdown;
    }
    if message == firewall_deleted_message(instance_name) {
        return RdpSignal::FirewallDeleted;
    }
    let tunnel_marker = format!("{TUNNEL_STARTED_PREFIX}{instance_name}");
    if message.contains(&tunnel_marker) {
        if let Some((_, port)) = message.split_once(": ") {
            let port = port.trim();
            if !port.is_empty() {
                return RdpSignal::TunnelStarted {
                    port: port.to_string(),
                };
            }
        }
    }
    RdpSignal::Other
}
