//! Credential persistence.
//!
//! Tokens live as one JSON file per account in a directory, the way the
//! registration tooling writes them. Field names are the token-file
//! spelling (camelCase); values are kept as raw strings and converted
//! leniently when a [`Credential`] is built, so one malformed file never
//! poisons the rest of the pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use kirobridge_core::{Credential, IdentityProvider, RegistrationMode};
use kirobridge_wire::{MintedCredential, RefreshedTokens};

use crate::error::StoreError;

// ============================================================================
// Token Record
// ============================================================================

/// One persisted token file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Bearer access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access-token expiry, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Account display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    /// Account email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Identity provider spelling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
    /// Backend region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Registration mode spelling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    /// CSRF token from the last exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// Portal session token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Profile ARN from the last exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

impl TokenRecord {
    /// Builds a pool credential from this record.
    ///
    /// Returns `None` when the record has no access token; unparseable
    /// expiry strings become "no expiry" (the credential then counts as
    /// expired and goes through refresh before use).
    pub fn to_credential(&self, id: &str) -> Option<Credential> {
        let access_token = self.access_token.as_deref()?;
        if access_token.is_empty() {
            return None;
        }

        let mut credential = Credential::new(id, access_token);
        credential.refresh_token = self.refresh_token.clone().unwrap_or_default();
        credential.account_name = self.account_name.clone().unwrap_or_default();
        credential.email = self.email.clone().unwrap_or_default();
        credential.idp = IdentityProvider::parse(self.idp.as_deref().unwrap_or("Google"));
        credential.region = self.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        credential.registration_mode =
            RegistrationMode::parse(self.auth_method.as_deref().unwrap_or("social"));
        credential.csrf_token = self.csrf_token.clone();
        credential.session_token = self.session_token.clone();
        credential.expires_at = self.expires_at.as_deref().and_then(parse_expiry);
        Some(credential)
    }

    /// Folds rotated token material into this record.
    pub fn apply_refresh(&mut self, tokens: &RefreshedTokens) {
        self.access_token = Some(tokens.access_token.clone());
        self.expires_at = Some(tokens.expires_at.to_rfc3339());
        if tokens.csrf_token.is_some() {
            self.csrf_token = tokens.csrf_token.clone();
        }
        if tokens.profile_arn.is_some() {
            self.profile_arn = tokens.profile_arn.clone();
        }
    }

    /// Builds a record from a freshly minted credential.
    pub fn from_minted(minted: &MintedCredential) -> Self {
        Self {
            access_token: Some(minted.access_token.clone()),
            expires_at: Some(minted.expires_at.to_rfc3339()),
            idp: Some(minted.idp.as_str().to_string()),
            csrf_token: minted.csrf_token.clone(),
            session_token: minted.session_token.clone(),
            profile_arn: minted.profile_arn.clone(),
            auth_method: Some("webview".to_string()),
            ..Default::default()
        }
    }
}

/// Parses an RFC 3339 expiry, tolerating the `Z` suffix variants the
/// token files use.
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence collaborator for token records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lists every record, keyed by its stable id.
    async fn list(&self) -> Result<Vec<(String, TokenRecord)>, StoreError>;

    /// Loads one record.
    async fn get(&self, id: &str) -> Result<TokenRecord, StoreError>;

    /// Saves one record.
    async fn save(&self, id: &str, record: &TokenRecord) -> Result<(), StoreError>;
}

// ============================================================================
// File Store
// ============================================================================

/// Returns the default token directory (`~/.config/kirobridge/tokens` on
/// Linux).
pub fn default_token_dir() -> PathBuf {
    dirs::config_dir()
        .map(|c| c.join("kirobridge").join("tokens"))
        .unwrap_or_else(|| PathBuf::from("tokens"))
}

/// File-backed credential store: one JSON file per account.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store over a specific directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store over the default token directory.
    pub fn default_location() -> Self {
        Self::new(default_token_dir())
    }

    /// The directory this store reads from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn list(&self) -> Result<Vec<(String, TokenRecord)>, StoreError> {
        let mut records = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match read_record(&path).await {
                Ok(record) => records.push((id.to_string(), record)),
                Err(e) => {
                    // One broken file must not poison the rest.
                    warn!(id, error = %e, "Skipping unreadable token file");
                }
            }
        }

        // Stable ordering regardless of directory iteration order.
        records.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(count = records.len(), dir = %self.dir.display(), "Listed token records");
        Ok(records)
    }

    async fn get(&self, id: &str) -> Result<TokenRecord, StoreError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        read_record(&path).await
    }

    async fn save(&self, id: &str, record: &TokenRecord) -> Result<(), StoreError> {
        ensure_dir(&self.dir).await?;
        let path = self.record_path(id);
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        set_restrictive_permissions(&path).await?;
        debug!(id, path = %path.display(), "Saved token record");
        Ok(())
    }
}

async fn read_record(path: &Path) -> Result<TokenRecord, StoreError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

// ============================================================================
// Security: File Permissions
// ============================================================================

/// Creates the token directory with owner-only permissions.
async fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    set_restrictive_dir_permissions(dir).await
}

/// Token files carry secrets; they are owner read/write only.
#[cfg(unix)]
async fn set_restrictive_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_restrictive_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o700);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// No-op for non-Unix systems.
#[cfg(not(unix))]
async fn set_restrictive_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// No-op for non-Unix systems.
#[cfg(not(unix))]
async fn set_restrictive_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(token: &str) -> TokenRecord {
        TokenRecord {
            access_token: Some(token.to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some((Utc::now() + Duration::hours(1)).to_rfc3339()),
            account_name: Some("acct".to_string()),
            email: Some("a@b.c".to_string()),
            idp: Some("Github".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_to_credential() {
        let credential = record("tok").to_credential("id-1").unwrap();
        assert_eq!(credential.id, "id-1");
        assert_eq!(credential.access_token, "tok");
        assert_eq!(credential.idp, IdentityProvider::Github);
        assert!(credential.is_available());
    }

    #[test]
    fn test_to_credential_without_token() {
        let empty = TokenRecord::default();
        assert!(empty.to_credential("id").is_none());

        let blank = TokenRecord {
            access_token: Some(String::new()),
            ..Default::default()
        };
        assert!(blank.to_credential("id").is_none());
    }

    #[test]
    fn test_bad_expiry_means_expired() {
        let mut rec = record("tok");
        rec.expires_at = Some("not-a-date".to_string());
        let credential = rec.to_credential("id").unwrap();
        assert!(credential.expires_at.is_none());
        assert!(credential.is_expired());
    }

    #[test]
    fn test_expiry_z_suffix() {
        let mut rec = record("tok");
        rec.expires_at = Some("2099-01-02T03:04:05Z".to_string());
        let credential = rec.to_credential("id").unwrap();
        assert!(credential.expires_at.is_some());
        assert!(!credential.is_expired());
    }

    #[test]
    fn test_apply_refresh_keeps_existing_csrf_when_absent() {
        let mut rec = record("old");
        rec.csrf_token = Some("csrf-old".to_string());
        let tokens = RefreshedTokens {
            access_token: "new".to_string(),
            csrf_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            profile_arn: None,
        };
        rec.apply_refresh(&tokens);
        assert_eq!(rec.access_token.as_deref(), Some("new"));
        assert_eq!(rec.csrf_token.as_deref(), Some("csrf-old"));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens"));

        store.save("acct-1", &record("tok-1")).await.unwrap();
        store.save("acct-2", &record("tok-2")).await.unwrap();

        let loaded = store.get("acct-1").await.unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("tok-1"));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "acct-1");
        assert_eq!(listed[1].0, "acct-2");
    }

    #[tokio::test]
    async fn test_file_store_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(matches!(
            store.get("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save("good", &record("tok")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{not json")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("ignored.txt"), "nope")
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "good");
    }

    #[tokio::test]
    async fn test_list_empty_when_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("does-not-exist"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens"));
        store.save("acct", &record("tok")).await.unwrap();

        let meta = std::fs::metadata(store.dir().join("acct.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        let dir_meta = std::fs::metadata(store.dir()).unwrap();
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }
}
