//! Session relay error types.

use thiserror::Error;

/// Session relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Endpoint could not be derived from the configured base URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Credential lookup failed
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Client settings that cannot work
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The client's driver task has stopped
    #[error("Session client is no longer running")]
    ClientStopped,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Send error
    #[error("Failed to send frame: {0}")]
    Send(String),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
