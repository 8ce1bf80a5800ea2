// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `kirobridge` Core
//!
//! Core types, models, and settings for the `kirobridge` workspace.
//!
//! This crate provides the foundational abstractions used across all other
//! `kirobridge` crates, including:
//!
//! - Domain models (credentials, usage snapshots)
//! - Error types
//! - The settings layer (endpoints, timeout budgets, ban policy)
//!
//! ## Key Types
//!
//! ### Credential Types
//! - [`Credential`] - One registered account with its token pair
//! - [`CredentialStatus`] - Active/Banned health flag
//! - [`IdentityProvider`] - Social login provider behind the account
//! - [`RegistrationMode`] - How the account was registered
//! - [`CredentialSummary`] - Serializable status row for observability
//!
//! ### Usage Types
//! - [`UsageSnapshot`] - Account identity, tier, and quota usage
//! - [`ResourceUsage`] - One metered resource with trial and bonus grants
//!
//! ### Configuration
//! - [`Settings`] - Endpoints, timeout budgets, OAuth listener parameters
//! - [`BanPolicy`] - Keyword list and error threshold for ban detection

pub mod config;
pub mod error;
pub mod models;

// Re-export error types
pub use error::CoreError;

// Re-export all model types
pub use models::{
    // Credential types
    Credential,
    CredentialStatus,
    CredentialSummary,
    IdentityProvider,
    RegistrationMode,
    redact,
    // Usage types
    BonusGrant,
    ResourceUsage,
    TrialInfo,
    UsageSnapshot,
};

// Re-export settings
pub use config::{BanPolicy, Settings};
