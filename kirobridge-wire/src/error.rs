//! Wire error types.

use thiserror::Error;

use crate::cbor::CborError;

// ============================================================================
// Wire Error
// ============================================================================

/// Error type for protocol-client operations.
///
/// The variants follow the failure taxonomy the pool cares about:
/// `Unauthorized` and `Suspended` are credential-health signals,
/// `QuotaExceeded` is recoverable at the reset boundary, `Decode` means the
/// backend sent something we could not interpret (the credential is not at
/// fault), and everything else is transport-level.
#[derive(Debug, Error)]
pub enum WireError {
    /// HTTP transport failed (connect error, TLS, timeout at the socket).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request exceeded its timeout budget.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Token invalid or expired (HTTP 401).
    #[error("Unauthorized: token expired or invalid")]
    Unauthorized,

    /// Account suspended by the backend (HTTP 423). Terminal for the
    /// credential.
    #[error("Account suspended")]
    Suspended,

    /// Access forbidden (HTTP 403).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Rate limited / quota exhausted (HTTP 429).
    #[error("Quota exceeded")]
    QuotaExceeded,

    /// Malformed envelope or response payload. Not the credential's fault.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Binary envelope codec failure.
    #[error("Envelope error: {0}")]
    Envelope(#[from] CborError),

    /// Request could not be built (bad header value, missing cookie
    /// material).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic RPC failure with whatever detail the backend returned.
    #[error("{operation} failed ({status}): {detail}")]
    Rpc {
        /// Operation name.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Decoded or raw error body.
        detail: String,
    },
}

impl WireError {
    /// Returns true for failures worth retrying at this layer.
    ///
    /// Credential-health signals and decode failures are terminal here;
    /// retrying them either hammers a dead credential or repeats a
    /// deterministic parse failure.
    pub fn is_transient(&self) -> bool {
        match self {
            WireError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            WireError::Timeout(_) => true,
            WireError::Rpc { status, .. } => *status >= 500,
            WireError::Unauthorized
            | WireError::Suspended
            | WireError::Forbidden(_)
            | WireError::QuotaExceeded
            | WireError::Decode(_)
            | WireError::Envelope(_)
            | WireError::InvalidRequest(_) => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors_are_not_transient() {
        assert!(!WireError::Unauthorized.is_transient());
        assert!(!WireError::Suspended.is_transient());
        assert!(!WireError::QuotaExceeded.is_transient());
        assert!(!WireError::Decode("bad".to_string()).is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = WireError::Rpc {
            operation: "GetUserUsageAndLimits".to_string(),
            status: 503,
            detail: "unavailable".to_string(),
        };
        assert!(err.is_transient());

        let err = WireError::Rpc {
            operation: "GetUserUsageAndLimits".to_string(),
            status: 404,
            detail: "not found".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(WireError::Timeout(30).is_transient());
    }
}
