//! Domain models for `kirobridge`.
//!
//! This module is organized into submodules by concern:
//! - [`credential`] - Credentials and their health/usage state
//! - [`usage`] - Usage snapshots returned by the usage-query backend

pub mod credential;
pub mod usage;

pub use credential::{
    redact, Credential, CredentialStatus, CredentialSummary, IdentityProvider, RegistrationMode,
};
pub use usage::{BonusGrant, ResourceUsage, TrialInfo, UsageSnapshot};
