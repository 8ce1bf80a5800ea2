//! Credential acquisition flow.
//!
//! Drives one PKCE authorization round trip:
//!
//! ```text
//! Idle -> ListenerStarted -> AwaitingCallback -> CodeReceived -> Exchanging -> Completed
//!                                    |                |
//!                                    +-> Failed <-----+   (error callback, CSRF mismatch, timeout)
//! ```
//!
//! The browser-open side effect is a caller-supplied closure; the flow
//! itself only produces the authorization URL and waits. The minted
//! credential is returned to the caller for persistence, never injected
//! into a pool directly.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use kirobridge_core::{IdentityProvider, Settings};
use kirobridge_wire::{MintedCredential, PortalClient};

use crate::error::OAuthError;
use crate::listener::{CallbackListener, CallbackOutcome};
use crate::pkce::{generate_state, PkcePair};

// ============================================================================
// Flow State
// ============================================================================

/// Observable phase of an acquisition flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Nothing started.
    Idle,
    /// The callback listener is bound.
    ListenerStarted,
    /// Waiting for the browser redirect.
    AwaitingCallback,
    /// Authorization code received and state verified.
    CodeReceived,
    /// Exchanging the code for tokens.
    Exchanging,
    /// A credential was minted.
    Completed,
    /// Terminal failure; the user must restart the flow.
    Failed,
}

// ============================================================================
// Acquisition Flow
// ============================================================================

/// One-shot PKCE acquisition flow against the portal.
pub struct AcquisitionFlow {
    portal: Arc<PortalClient>,
    port: u16,
    wait_timeout: Duration,
}

impl AcquisitionFlow {
    /// Creates a flow with settings-supplied port and wait budget.
    pub fn new(portal: Arc<PortalClient>, settings: &Settings) -> Self {
        Self {
            portal,
            port: settings.oauth_port,
            wait_timeout: settings.oauth_wait(),
        }
    }

    /// Creates a flow with explicit parameters.
    pub fn with_parameters(portal: Arc<PortalClient>, port: u16, wait_timeout: Duration) -> Self {
        Self {
            portal,
            port,
            wait_timeout,
        }
    }

    /// Runs the flow to completion.
    ///
    /// `open_url` receives the authorization URL; opening a browser (or
    /// telling the user to) is its business. Every failure is terminal:
    /// a timed-out or CSRF-mismatched flow must be restarted from scratch.
    #[instrument(skip(self, open_url), fields(idp = %idp))]
    pub async fn acquire<F>(
        &self,
        idp: IdentityProvider,
        open_url: F,
    ) -> Result<MintedCredential, OAuthError>
    where
        F: FnOnce(&str),
    {
        let result = self.run(idp, open_url).await;
        match &result {
            Ok(_) => info!(state = ?FlowState::Completed, "Credential minted"),
            Err(e) => warn!(state = ?FlowState::Failed, error = %e, "Acquisition flow failed"),
        }
        result
    }

    async fn run<F>(&self, idp: IdentityProvider, open_url: F) -> Result<MintedCredential, OAuthError>
    where
        F: FnOnce(&str),
    {
        debug!(state = ?FlowState::Idle, port = self.port, "Starting acquisition flow");

        let listener = CallbackListener::bind(self.port).await?;
        let redirect_uri = listener.redirect_uri();
        debug!(state = ?FlowState::ListenerStarted, %redirect_uri, "Listener bound");

        let pkce = PkcePair::generate()?;
        let state = generate_state()?;

        let authorize_url = self
            .portal
            .initiate_login(idp, &redirect_uri, &pkce.challenge, PkcePair::method(), &state)
            .await?;

        open_url(&authorize_url);
        debug!(state = ?FlowState::AwaitingCallback, timeout_secs = self.wait_timeout.as_secs(), "Waiting for callback");

        let outcome = listener.wait(self.wait_timeout).await?;
        let code = verify_callback(outcome, &state)?;
        debug!(state = ?FlowState::CodeReceived, "State verified");

        debug!(state = ?FlowState::Exchanging, "Exchanging authorization code");
        let minted = self
            .portal
            .exchange_code(idp, &code, &pkce.verifier, &redirect_uri, &state)
            .await?;

        Ok(minted)
    }
}

/// Checks the callback outcome against the generated CSRF state.
///
/// The returned state must equal the generated one exactly; a missing or
/// different state is a CSRF failure even when the code looks valid.
fn verify_callback(outcome: CallbackOutcome, expected_state: &str) -> Result<String, OAuthError> {
    match outcome {
        CallbackOutcome::Error { error, description } => {
            Err(OAuthError::Callback { error, description })
        }
        CallbackOutcome::Code { code, state } => {
            if state.as_deref() == Some(expected_state) {
                Ok(code)
            } else {
                Err(OAuthError::CsrfMismatch)
            }
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
    fn test_verify_callback_accepts_matching_state() {
        let outcome = CallbackOutcome::Code {
            code: "auth-code".to_string(),
            state: Some("expected".to_string()),
        };
        assert_eq!(verify_callback(outcome, "expected").unwrap(), "auth-code");
    }

    #[test]
    fn test_verify_callback_rejects_mismatched_state() {
        // A valid-looking code does not rescue a wrong state
        let outcome = CallbackOutcome::Code {
            code: "auth-code".to_string(),
            state: Some("tampered".to_string()),
        };
        assert!(matches!(
            verify_callback(outcome, "expected"),
            Err(OAuthError::CsrfMismatch)
        ));
    }

    #[test]
    fn test_verify_callback_rejects_missing_state() {
        let outcome = CallbackOutcome::Code {
            code: "auth-code".to_string(),
            state: None,
        };
        assert!(matches!(
            verify_callback(outcome, "expected"),
            Err(OAuthError::CsrfMismatch)
        ));
    }

    #[test]
    fn test_verify_callback_surfaces_server_error() {
        let outcome = CallbackOutcome::Error {
            error: "access_denied".to_string(),
            description: "User cancelled".to_string(),
        };
        match verify_callback(outcome, "expected") {
            Err(OAuthError::Callback { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "User cancelled");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
