//! CLI command implementations.

pub mod chat;
pub mod login;
pub mod refresh;
pub mod status;
pub mod usage;

use std::sync::Arc;

use kirobridge_core::Settings;
use kirobridge_pool::{CredentialPool, FileCredentialStore};
use kirobridge_wire::PortalClient;

/// Shared handles every command runs against.
///
/// Constructed once in `main` and passed by reference; there are no
/// module-level singletons anywhere in the workspace.
pub struct AppContext {
    /// Settings layer.
    pub settings: Settings,
    /// Token persistence.
    pub store: Arc<FileCredentialStore>,
    /// Web portal client.
    pub portal: Arc<PortalClient>,
    /// Credential pool.
    pub pool: Arc<CredentialPool>,
    /// JSON output flag.
    pub json: bool,
}
