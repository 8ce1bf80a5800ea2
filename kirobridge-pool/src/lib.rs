// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `kirobridge` Pool
//!
//! The credential pool and its persistence collaborator.
//!
//! This crate provides:
//!
//! - **`CredentialPool`**: round-robin selection, health transitions, ban
//!   classification, refresh orchestration, usage accounting
//! - **`CredentialStore`**: the token persistence trait, with the
//!   file-backed [`FileCredentialStore`] implementation
//! - **`TokenRefresher`**: the narrow refresh capability the pool consumes
//!
//! ## Locking
//!
//! One mutex guards the in-memory pool state. It is never held across an
//! outbound network call: refresh candidates are picked under the lock,
//! the refresh happens unlocked, and results are applied under a fresh
//! acquisition.

pub mod error;
pub mod pool;
pub mod store;

pub use error::StoreError;
pub use pool::{CredentialPool, PoolStatus, TokenRefresher};
pub use store::{default_token_dir, CredentialStore, FileCredentialStore, TokenRecord};
