//! iapadmin Protocol
//!
//! Shared types for communication between iapadmin clients and the
//! companion server. HTTP bodies and WebSocket frames are JSON.

use uuid::Uuid;

// Re-exports
pub mod background;
pub mod client;
pub mod sentinel;
pub mod server;
pub mod types;

pub use background::{BackgroundRequest, BackgroundResponse, ContentMessage};
pub use client::{ControlCommand, ControlMessage};
pub use server::{OutputMessage, PreparedOperation};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
