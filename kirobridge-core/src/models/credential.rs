//! Credential types.
//!
//! A [`Credential`] is one registered backend account: an access/refresh
//! token pair plus identity metadata, health flags, and usage counters.
//! Credentials are owned by the pool; everything here is plain state with
//! derived accessors, no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity Provider
// ============================================================================

/// Social identity provider behind an account.
///
/// The web portal requires this as the `Idp` cookie value, spelled exactly
/// as registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IdentityProvider {
    /// Google social login.
    #[default]
    Google,
    /// GitHub social login.
    Github,
}

impl IdentityProvider {
    /// Returns the wire spelling used in cookies and OAuth parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityProvider::Google => "Google",
            IdentityProvider::Github => "Github",
        }
    }

    /// Parses the wire spelling, defaulting to Google for unknown values.
    ///
    /// Token files written by older tooling carry free-form strings here,
    /// so this is lenient by design.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "github" => IdentityProvider::Github,
            _ => IdentityProvider::Google,
        }
    }
}

impl std::fmt::Display for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Registration Mode
// ============================================================================

/// How the account behind a credential was registered.
///
/// The set is closed and fixed; carried through from token files for
/// observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    /// Registered by the automated registration tooling.
    #[default]
    Automated,
    /// Registered interactively through the embedded web view.
    WebView,
}

impl RegistrationMode {
    /// Parses the token-file spelling (`"social"`, `"webview"`, ...).
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "webview" | "web_view" => RegistrationMode::WebView,
            _ => RegistrationMode::Automated,
        }
    }
}

// ============================================================================
// Credential Status
// ============================================================================

/// Health status of a credential.
///
/// There is no un-ban transition: once banned, a credential stays banned
/// until the whole set is replaced by a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Usable, subject to expiry.
    #[default]
    Active,
    /// Declared dead, either by a backend signal or the error threshold.
    Banned,
}

// ============================================================================
// Credential
// ============================================================================

/// One registered account with its token pair and bookkeeping state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Stable identifier, derived from the token file name.
    pub id: String,
    /// Account display name, if known.
    pub account_name: String,
    /// Account email, if known.
    pub email: String,
    /// Identity provider behind the account.
    pub idp: IdentityProvider,
    /// Backend region the account was registered in.
    pub region: String,
    /// How the account was registered.
    pub registration_mode: RegistrationMode,

    /// Bearer access token. Never logged in full.
    pub access_token: String,
    /// Refresh token. Never logged in full.
    pub refresh_token: String,
    /// CSRF token from the last portal exchange, if any.
    pub csrf_token: Option<String>,
    /// Portal session token (the `RefreshToken` cookie), if any.
    pub session_token: Option<String>,
    /// Absolute access-token expiry.
    pub expires_at: Option<DateTime<Utc>>,

    /// Health flag. Sticky once banned.
    pub status: CredentialStatus,
    /// Why the credential was banned. Set once, never overwritten.
    pub ban_reason: String,
    /// Consecutive failures since the last success.
    pub error_count: u32,
    /// Most recent failure message.
    pub last_error: String,

    /// Selections handed out for this credential.
    pub request_count: u64,
    /// When the credential was last selected.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Advisory quota consumption; authoritative data comes from the
    /// usage-query backend.
    pub quota_used: u64,
    /// Advisory quota ceiling.
    pub quota_limit: u64,
}

/// Default advisory quota ceiling until the backend reports one.
pub const DEFAULT_QUOTA_LIMIT: u64 = 500;

impl Credential {
    /// Creates a credential with empty bookkeeping state.
    pub fn new(id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_name: String::new(),
            email: String::new(),
            idp: IdentityProvider::default(),
            region: "us-east-1".to_string(),
            registration_mode: RegistrationMode::default(),
            access_token: access_token.into(),
            refresh_token: String::new(),
            csrf_token: None,
            session_token: None,
            expires_at: None,
            status: CredentialStatus::Active,
            ban_reason: String::new(),
            error_count: 0,
            last_error: String::new(),
            request_count: 0,
            last_used_at: None,
            quota_used: 0,
            quota_limit: DEFAULT_QUOTA_LIMIT,
        }
    }

    /// Returns true if the access token is past its expiry.
    ///
    /// A credential with no known expiry is treated as expired: the refresh
    /// path is the only way to establish a trustworthy lifetime for it.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => true,
        }
    }

    /// Returns true if the credential is banned.
    pub fn is_banned(&self) -> bool {
        self.status == CredentialStatus::Banned
    }

    /// Returns true if the credential can be handed out by the pool.
    pub fn is_available(&self) -> bool {
        !self.is_banned() && !self.is_expired()
    }

    /// Advisory quota consumption as a percentage.
    pub fn quota_percent(&self) -> f64 {
        if self.quota_limit == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = (self.quota_used as f64 / self.quota_limit as f64) * 100.0;
        percent
    }

    /// Account label for logs: the name if set, otherwise the email,
    /// otherwise the id.
    pub fn label(&self) -> &str {
        if !self.account_name.is_empty() {
            &self.account_name
        } else if !self.email.is_empty() {
            &self.email
        } else {
            &self.id
        }
    }

    /// Serializable status row for the pool's observability surface.
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            account: self.label().to_string(),
            region: self.region.clone(),
            is_banned: self.is_banned(),
            ban_reason: self.ban_reason.clone(),
            is_expired: self.is_expired(),
            is_available: self.is_available(),
            request_count: self.request_count,
            error_count: self.error_count,
            quota_used: self.quota_used,
            quota_limit: self.quota_limit,
            quota_percent: (self.quota_percent() * 10.0).round() / 10.0,
        }
    }
}

// ============================================================================
// Credential Summary
// ============================================================================

/// One row of the pool status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    /// Account label.
    pub account: String,
    /// Backend region.
    pub region: String,
    /// Banned flag.
    pub is_banned: bool,
    /// Ban reason, empty when not banned.
    pub ban_reason: String,
    /// Expired flag.
    pub is_expired: bool,
    /// Available flag.
    pub is_available: bool,
    /// Selections handed out.
    pub request_count: u64,
    /// Consecutive failures since the last success.
    pub error_count: u32,
    /// Advisory quota used.
    pub quota_used: u64,
    /// Advisory quota ceiling.
    pub quota_limit: u64,
    /// Advisory quota percentage, one decimal.
    pub quota_percent: f64,
}

// ============================================================================
// Secret Redaction
// ============================================================================

/// Renders an opaque secret for logging: a short prefix plus the length.
///
/// Secrets must never reach logs in full; every log site that touches a
/// token goes through this.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = secret.chars().take(8).collect();
    format!("{prefix}…({})", secret.len())
}

// ============================================================================
// Tests
// ============================================================================
