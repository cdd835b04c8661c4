//! Private RDP gate
//!
//! All lifecycle logic for one instance's RDP session lives here as a pure,
//! synchronous function: `transition(state, input) -> (state, effects)`.
//! The console executes the effects (preflight request, registry changes,
//! control messages) and feeds the outcomes back in as inputs.

use iapadmin_protocol::sentinel::{classify, RdpSignal};
use iapadmin_protocol::{Instance, OutputMessage};

pub const STATUS_CONNECTED: &str = "Connected to server";
pub const STATUS_READY: &str = "Ready to RDP";
pub const STATUS_FIREWALL_CLOSED: &str = "Firewall has closed, restart RDP if you wish to connect";
pub const STATUS_SHUT_DOWN: &str = "Shut down";
pub const STATUS_CONNECTION_CLOSED: &str = "Connection closed";
pub const STATUS_CLOSED_FROM_SERVER: &str = "Closed from server";

pub fn firewall_not_deleted_message(instance: &str) -> String {
    format!("Server couldn't delete firewall rule for {instance}, please delete manually")
}

// ---------------------------------------------------------------------------
// RdpPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdpPhase {
    Idle,
    AwaitingPreflight,
    /// Session registered, channel not yet open
    Ready,
    Running,
    Closing,
    Closed,
    Error(String),
}

impl RdpPhase {
    /// A session exists and a click should end it
    pub fn is_live(&self) -> bool {
        matches!(self, RdpPhase::Ready | RdpPhase::Running)
    }
}

// ---------------------------------------------------------------------------
// RdpState: the client-side RDP fields of one instance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdpState {
    pub instance: String,
    pub phase: RdpPhase,
    pub rdp_running: bool,
    pub port_running: Option<String>,
    pub rdp_status: Option<String>,
    pub rdp_error: Option<String>,
    firewall_deleted: bool,
    session_registered: bool,
}

impl RdpState {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            phase: RdpPhase::Idle,
            rdp_running: false,
            port_running: None,
            rdp_status: None,
            rdp_error: None,
            firewall_deleted: false,
            session_registered: false,
        }
    }

    /// Copy the RDP fields onto a (possibly freshly listed) instance
    pub fn apply_to(&self, instance: &mut Instance) {
        instance.rdp_running = self.rdp_running;
        instance.port_running = self.port_running.clone();
        instance.rdp_status = self.rdp_status.clone();
        instance.rdp_error = self.rdp_error.clone();
    }

    /// Clear the live fields and, if a session was registered, release it
    fn terminate(&mut self, phase: RdpPhase, effects: &mut Vec<RdpEffect>) {
        self.phase = phase;
        self.rdp_running = false;
        self.port_running = None;
        if self.session_registered {
            self.session_registered = false;
            effects.push(RdpEffect::ReleaseSession);
            effects.push(RdpEffect::Notice(format!(
                "Ended private RDP for {}",
                self.instance
            )));
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum RdpInput {
    /// Operator clicked RDP for this instance
    Clicked {
        running: bool,
        preflight_enabled: bool,
    },
    PreflightSucceeded,
    PreflightFailed(String),
    /// The session's channel is open and the instance was sent
    ChannelOpened,
    /// The session's channel could not be opened
    ConnectFailed(String),
    Inbound(OutputMessage),
    /// Operator closed the session's tab
    EndRequested,
    ChannelErrored(String),
    ChannelClosed,
}

// ---------------------------------------------------------------------------
// Effects: describe IO to be executed by the caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdpEffect {
    /// Run the pre-RDP operations with the current common params
    SendPreflight,
    /// Append an RDP session to the registry and open its channel
    RegisterSession,
    /// Send the end control message on the session's channel
    SendEnd,
    Notice(String),
    /// Drop the session from the registry
    ReleaseSession,
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

pub fn transition(mut state: RdpState, input: RdpInput) -> (RdpState, Vec<RdpEffect>) {
    let mut effects = Vec::new();

    match input {
        RdpInput::Clicked {
            running,
            preflight_enabled,
        } => {
            if matches!(state.phase, RdpPhase::AwaitingPreflight | RdpPhase::Closing) {
                // already on its way in or out
            } else if running || state.phase.is_live() {
                state.phase = RdpPhase::Closing;
                effects.push(RdpEffect::SendEnd);
            } else {
                state.rdp_error = None;
                state.rdp_status = None;
                state.firewall_deleted = false;
                if preflight_enabled {
                    state.phase = RdpPhase::AwaitingPreflight;
                    effects.push(RdpEffect::SendPreflight);
                } else {
                    register(&mut state, &mut effects);
                }
            }
        }

        RdpInput::PreflightSucceeded => {
            if state.phase == RdpPhase::AwaitingPreflight {
                register(&mut state, &mut effects);
            }
        }

        RdpInput::PreflightFailed(message) => {
            if state.phase == RdpPhase::AwaitingPreflight {
                state.rdp_error = Some(message.clone());
                state.terminate(RdpPhase::Error(message), &mut effects);
            }
        }

        RdpInput::ChannelOpened => {
            if state.phase == RdpPhase::Ready {
                state.phase = RdpPhase::Running;
                state.rdp_status = Some(STATUS_CONNECTED.to_string());
            }
        }

        RdpInput::ConnectFailed(message) => {
            if state.phase == RdpPhase::Ready {
                state.rdp_error = Some(message.clone());
                state.terminate(RdpPhase::Error(message), &mut effects);
            }
        }

        RdpInput::Inbound(message) => {
            if !state.session_registered {
                return (state, effects);
            }
            if message.has_error() {
                state.rdp_status = None;
                state.rdp_error = Some(message.error.clone());
                state.terminate(RdpPhase::Error(message.error), &mut effects);
                return (state, effects);
            }
            if state.phase == RdpPhase::Ready {
                state.phase = RdpPhase::Running;
                state.rdp_status = Some(STATUS_CONNECTED.to_string());
            }
            match classify(&message.message, &state.instance) {
                RdpSignal::ReadyForCommand => {
                    state.rdp_status = Some(STATUS_READY.to_string());
                }
                RdpSignal::TunnelStarted { port } => {
                    state.port_running = Some(port);
                }
                RdpSignal::Shutdown => {
                    state.phase = RdpPhase::Closing;
                    state.rdp_running = false;
                    state.port_running = None;
                    state.rdp_status = Some(STATUS_SHUT_DOWN.to_string());
                }
                RdpSignal::FirewallDeleted => {
                    state.phase = RdpPhase::Closing;
                    state.firewall_deleted = true;
                    state.rdp_running = false;
                    state.port_running = None;
                    state.rdp_status = Some(STATUS_FIREWALL_CLOSED.to_string());
                }
                RdpSignal::Other => {}
            }
        }

        RdpInput::EndRequested => {
            if state.phase.is_live() {
                state.phase = RdpPhase::Closing;
                effects.push(RdpEffect::SendEnd);
            }
        }

        RdpInput::ChannelErrored(message) => {
            if state.session_registered {
                if state.firewall_deleted {
                    state.rdp_status = Some(STATUS_CONNECTION_CLOSED.to_string());
                    state.terminate(RdpPhase::Closed, &mut effects);
                } else {
                    state.rdp_status = None;
                    state.rdp_error = Some(firewall_not_deleted_message(&state.instance));
                    state.terminate(RdpPhase::Error(message), &mut effects);
                }
            }
        }

        RdpInput::ChannelClosed => {
            if state.session_registered {
                if state.firewall_deleted {
                    state.rdp_status = Some(STATUS_CLOSED_FROM_SERVER.to_string());
                } else {
                    state.rdp_status = None;
                    state.rdp_error = Some(firewall_not_deleted_message(&state.instance));
                }
                state.terminate(RdpPhase::Closed, &mut effects);
            }
        }
    }

    (state, effects)
}

fn register(state: &mut RdpState, effects: &mut Vec<RdpEffect>) {
    state.phase = RdpPhase::Ready;
    state.rdp_running = true;
    state.session_registered = true;
    effects.push(RdpEffect::RegisterSession);
    effects.push(RdpEffect::Notice(format!(
        "Started private RDP for {}",
        state.instance
    )));
}
