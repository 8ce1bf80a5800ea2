//! PKCE parameter generation.
//!
//! Proof Key for Code Exchange binds the authorization code to a secret
//! this process generated: the verifier never leaves the machine until the
//! token exchange, and the challenge sent up front is its SHA-256 digest.

use base64::prelude::*;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::OAuthError;

/// Bytes of entropy behind the verifier and the state nonce.
const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;

// ============================================================================
// PKCE Pair
// ============================================================================

/// A generated PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The secret: base64url (no padding) of 32 random bytes.
    pub verifier: String,
    /// base64url (no padding) of SHA-256(verifier).
    pub challenge: String,
}

impl PkcePair {
    /// Generates a fresh pair from the system RNG.
    pub fn generate() -> Result<Self, OAuthError> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; VERIFIER_BYTES];
        rng.fill(&mut bytes).map_err(|_| OAuthError::Rng)?;

        let verifier = BASE64_URL_SAFE_NO_PAD.encode(bytes);
        let challenge = challenge_for(&verifier);

        Ok(Self { verifier, challenge })
    }

    /// The challenge method this pair uses, for the authorize URL.
    pub fn method() -> &'static str {
        "S256"
    }
}

/// Computes the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    let digest = digest::digest(&digest::SHA256, verifier.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(digest.as_ref())
}

/// Generates an independent random CSRF state nonce.
pub fn generate_state() -> Result<String, OAuthError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; STATE_BYTES];
    rng.fill(&mut bytes).map_err(|_| OAuthError::Rng)?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

// ============================================================================
// Tests
// ============================================================================
