//! OAuth flow error types.

use thiserror::Error;

use kirobridge_wire::WireError;

/// Error type for the acquisition flow.
///
/// `CsrfMismatch` and `Timeout` are terminal: the user must restart the
/// flow, nothing here is retried.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// The callback listener port could not be bound. Fatal configuration
    /// error: at most one flow may be active per port, and a bound port is
    /// never retried.
    #[error("Failed to bind callback listener on port {port}: {source}")]
    ListenerBind {
        /// The configured loopback port.
        port: u16,
        /// Underlying bind error.
        source: std::io::Error,
    },

    /// The callback returned `state` does not match the one we generated.
    #[error("CSRF state mismatch in OAuth callback")]
    CsrfMismatch,

    /// No callback arrived within the wait budget.
    #[error("Timed out after {0} seconds waiting for OAuth callback")]
    Timeout(u64),

    /// The authorization server reported an error.
    #[error("Authorization failed: {error}: {description}")]
    Callback {
        /// OAuth error code.
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Random generation failed (the system RNG is unavailable).
    #[error("Random generation failed")]
    Rng,

    /// A portal call (initiate or exchange) failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Listener I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
