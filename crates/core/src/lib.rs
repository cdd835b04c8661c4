//! iapadmin core
//!
//! State manager for the IAP admin console: config catalog, instance
//! directory, operation dispatch, running-session registry, the private RDP
//! gate and the streaming channels that drive it.

pub mod api;
pub mod catalog;
pub mod channel;
pub mod console;
pub mod directory;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod rdp;
pub mod registry;
pub mod tabs;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{CompanionApi, HttpCompanion};
pub use catalog::{Capabilities, Catalog, OperationDescriptor, OperationId, Param, Workflow};
pub use channel::{ChannelConnector, ChannelHandle, SessionEvent, SessionLog, WsConnector};
pub use console::{Console, ConsoleUpdate};
pub use directory::{Directory, ProjectMode};
pub use endpoints::{Endpoints, DEFAULT_SERVER_URL};
pub use error::{ClientError, Result};
pub use rdp::{RdpEffect, RdpInput, RdpPhase};
pub use registry::{Notice, RunningSession, SessionId, SessionKind, SessionRegistry};
pub use tabs::{TabCoordinator, TabHost, TabId};
