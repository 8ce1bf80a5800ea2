//! Store error types.

use thiserror::Error;

/// Error type for credential persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Token record not found.
    #[error("Token not found: {0}")]
    NotFound(String),

    /// Token record could not be parsed.
    #[error("Invalid token record {id}: {reason}")]
    InvalidRecord {
        /// Record id.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
