//! Feed error types.

use thiserror::Error;

/// Feed error type.
#[derive(Error, Debug)]
pub enum FeedError {
    /// A row is missing a field needed to identify the event
    #[error("{table} row is missing `{field}`")]
    MissingField { table: String, field: String },

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using FeedError.
pub type FeedResult<T> = Result<T, FeedError>;
