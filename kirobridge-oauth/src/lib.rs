// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `kirobridge` OAuth
//!
//! The credential acquisition flow: PKCE parameter generation, the
//! one-shot loopback callback listener, and the state machine that drives
//! browser authorization through to a minted credential.
//!
//! The flow never opens a browser itself; the authorization URL is handed
//! to a caller-supplied opener. The code exchange goes through the portal
//! client; persisting the minted credential is the caller's job (pool
//! population stays load-driven).

pub mod error;
pub mod flow;
pub mod listener;
pub mod pkce;

pub use error::OAuthError;
pub use flow::{AcquisitionFlow, FlowState};
pub use listener::{CallbackListener, CallbackOutcome};
pub use pkce::{generate_state, PkcePair};
