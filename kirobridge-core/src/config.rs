//! Settings for endpoints, timeout budgets, and ban policy.
//!
//! Everything here is policy, not protocol: each field has a default that
//! matches the backend as currently observed, and each can be overridden
//! from a settings file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

// ============================================================================
// Defaults
// ============================================================================

/// Default web portal endpoint.
pub const DEFAULT_PORTAL_ENDPOINT: &str = "https://prod.us-east-1.webportal.kiro.dev";

/// Default assistant backend region.
pub const DEFAULT_ASSISTANT_REGION: &str = "us-east-1";

fn default_portal_endpoint() -> String {
    DEFAULT_PORTAL_ENDPOINT.to_string()
}

fn default_assistant_region() -> String {
    DEFAULT_ASSISTANT_REGION.to_string()
}

fn default_usage_timeout() -> u64 {
    30
}

// Generation waits on model inference; its budget is materially larger
// than the bookkeeping calls.
fn default_generate_timeout() -> u64 {
    120
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_oauth_port() -> u16 {
    43210
}

fn default_oauth_wait() -> u64 {
    300
}

// ============================================================================
// Settings
// ============================================================================

/// Tunables for the pool, protocol clients, and OAuth flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Web portal endpoint for the binary RPC protocol.
    pub portal_endpoint: String,
    /// Region used to build the assistant endpoint.
    pub assistant_region: String,
    /// Timeout budget for usage queries, seconds.
    pub usage_timeout_secs: u64,
    /// Timeout budget for assistant generation, seconds.
    pub generate_timeout_secs: u64,
    /// Timeout budget for token refresh and code exchange, seconds.
    pub exchange_timeout_secs: u64,
    /// Loopback port for the OAuth callback listener.
    pub oauth_port: u16,
    /// Overall wait for the OAuth callback, seconds.
    pub oauth_wait_secs: u64,
    /// Ban detection policy.
    pub ban_policy: BanPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            portal_endpoint: default_portal_endpoint(),
            assistant_region: default_assistant_region(),
            usage_timeout_secs: default_usage_timeout(),
            generate_timeout_secs: default_generate_timeout(),
            exchange_timeout_secs: default_exchange_timeout(),
            oauth_port: default_oauth_port(),
            oauth_wait_secs: default_oauth_wait(),
            ban_policy: BanPolicy::default(),
        }
    }
}

impl Settings {
    /// Usage-query timeout as a [`Duration`].
    pub fn usage_timeout(&self) -> Duration {
        Duration::from_secs(self.usage_timeout_secs)
    }

    /// Generation timeout as a [`Duration`].
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }

    /// Exchange/refresh timeout as a [`Duration`].
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    /// OAuth overall wait as a [`Duration`].
    pub fn oauth_wait(&self) -> Duration {
        Duration::from_secs(self.oauth_wait_secs)
    }

    /// Rejects settings that cannot work at all.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for an empty endpoint, a zero
    /// timeout budget, port 0 (the listener needs a fixed, shareable
    /// port), or a zero ban threshold (which would ban on first failure).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.portal_endpoint.is_empty() {
            return Err(CoreError::InvalidConfig("portal_endpoint is empty".to_string()));
        }
        if self.usage_timeout_secs == 0
            || self.generate_timeout_secs == 0
            || self.exchange_timeout_secs == 0
            || self.oauth_wait_secs == 0
        {
            return Err(CoreError::InvalidConfig("timeout budgets must be non-zero".to_string()));
        }
        if self.oauth_port == 0 {
            return Err(CoreError::InvalidConfig("oauth_port must be fixed, not 0".to_string()));
        }
        if self.ban_policy.error_threshold == 0 {
            return Err(CoreError::InvalidConfig("ban error_threshold must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Ban Policy
// ============================================================================

fn default_ban_keywords() -> Vec<String> {
    ["banned", "suspended", "disabled", "unauthorized", "forbidden", "blocked"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_error_threshold() -> u32 {
    5
}

/// Policy for deciding when a failing credential is dead.
///
/// The keyword list and threshold are heuristics, not backend contract;
/// both are configurable. A transient 401 can false-positive into a ban,
/// accepted to keep a shared pool from hammering a dead credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanPolicy {
    /// Substrings that mark a failure message as a ban signal.
    pub keywords: Vec<String>,
    /// Consecutive failures (since the last success) that force a ban.
    pub error_threshold: u32,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self {
            keywords: default_ban_keywords(),
            error_threshold: default_error_threshold(),
        }
    }
}

impl BanPolicy {
    /// Returns the first ban keyword contained in `message`, if any.
    ///
    /// Matching is case-insensitive substring containment.
    pub fn matched_keyword(&self, message: &str) -> Option<&str> {
        let lower = message.to_lowercase();
        self.keywords
            .iter()
            .find(|k| lower.contains(k.as_str()))
            .map(String::as_str)
    }

    /// Returns true once `error_count` has reached the threshold.
    pub fn over_threshold(&self, error_count: u32) -> bool {
        error_count >= self.error_threshold
    }
}

// ============================================================================
// Tests
// ============================================================================
