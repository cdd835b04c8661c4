//! Error types for the console client

use thiserror::Error;

/// Shown when the companion server cannot be reached at all
pub const UNREACHABLE_MESSAGE: &str =
    "Error connecting to server, are you sure the companion server is running?";

/// Shown when the configuration declares nothing usable
pub const EMPTY_CONFIG_MESSAGE: &str = "Your configuration file is empty.";

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by console actions.
///
/// Every error is terminal for the action that raised it; nothing retries.
#[derive(Debug, Error)]
pub enum ClientError {
    // Transport (status 0 / connection refused)
    #[error("{}", UNREACHABLE_MESSAGE)]
    Unreachable { detail: String },

    // Application error carried in a JSON `error` field, passed through verbatim
    #[error("{0}")]
    Server(String),

    // Configuration
    #[error("{}", EMPTY_CONFIG_MESSAGE)]
    EmptyConfig,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Decoding
    #[error("Unexpected response from companion server: {0}")]
    Decode(String),

    // Streaming channels
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel closed")]
    ChannelClosed,

    // Lookups
    #[error("Operation {0} has not been prepared")]
    NotPrepared(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("No session at tab {0}")]
    UnknownSession(usize),
}

impl ClientError {
    /// Text for inline display next to the action that failed
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ClientError::Unreachable {
                detail: err.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Server(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(io) => ClientError::Channel(io.to_string()),
            WsError::ConnectionClosed | WsError::AlreadyClosed => ClientError::ChannelClosed,
            other => ClientError::Channel(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_messages_are_fixed_or_verbatim() {
        let unreachable = ClientError::Unreachable {
            detail: "connection refused".into(),
        };
        assert_eq!(unreachable.user_message(), UNREACHABLE_MESSAGE);
        assert_eq!(ClientError::EmptyConfig.user_message(), EMPTY_CONFIG_MESSAGE);
        assert_eq!(
            ClientError::Server("gCloud SDK auth invalid".into()).user_message(),
            "gCloud SDK auth invalid"
        );
    }
}
