//! Connection error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while establishing or using the game connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint could not be turned into a handshake request
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Handshake did not complete in time
    #[error("Handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Outbound frame could not be encoded
    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    /// The connection task has stopped
    #[error("Connection is closed")]
    Closed,
}

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
