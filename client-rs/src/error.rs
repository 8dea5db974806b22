//! Error types for the Switchboard client

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A protocol-level failure reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorResponse {
    /// Numeric status code (4xx/5xx)
    pub code: u16,

    /// Human-readable details, if the server sent any
    #[serde(default)]
    pub details: Option<String>,

    /// Action the failure relates to
    #[serde(default)]
    pub action: Option<String>,

    /// Sequence number of the request that failed
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl ErrorResponse {
    pub fn new(code: u16, details: impl Into<String>) -> Self {
        Self {
            code,
            details: Some(details.into()),
            action: None,
            sequence: None,
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}", self.code)?;
        if let Some(action) = &self.action {
            write!(f, " on {}", action)?;
        }
        if let Some(seq) = self.sequence {
            write!(f, " (seq {})", seq)?;
        }
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

/// Errors that can occur when using the Switchboard client
#[derive(Error, Debug, Clone)]
pub enum SwitchboardError {
    /// The transport did not reach the open state in time
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Low-level socket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection dropped while the request was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// A correlated request received no reply within its timeout
    #[error("No response to {action} (seq {seq})")]
    ResponseTimeout { action: String, seq: u64 },

    /// The server rejected the request
    #[error("Server rejected request: {0}")]
    Failure(ErrorResponse),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or inconsistent project keys
    #[error("Invalid key: {0}")]
    AuthKey(String),

    /// The session is not ready and the command could not be issued in time
    #[error("Not connected")]
    NotConnected,

    /// Failed to serialize/deserialize a frame
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The client has been closed
    #[error("Client shut down")]
    Shutdown,
}

impl SwitchboardError {
    /// The server-side error, if this is a protocol rejection
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            SwitchboardError::Failure(response) => Some(response),
            _ => None,
        }
    }

    /// Whether the server refused the credentials (401 or 403)
    ///
    /// A handshake refused this way is not retried.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, SwitchboardError::Failure(response) if matches!(response.code, 401 | 403))
    }
}

impl From<serde_json::Error> for SwitchboardError {
    fn from(err: serde_json::Error) -> Self {
        SwitchboardError::Serialization(err.to_string())
    }
}

/// Result type for Switchboard operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;
