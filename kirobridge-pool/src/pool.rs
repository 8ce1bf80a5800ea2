//! Credential pool.
//!
//! Owns the set of credentials and exposes selection (round-robin over the
//! available subset), status transitions, refresh orchestration, and usage
//! accounting.
//!
//! ## Locking discipline
//!
//! A single mutex guards the in-memory state (cursor, status flags,
//! counters). The guard is never held across an outbound network call:
//! refresh candidates are cloned out under the lock, the refresh happens
//! unlocked, and the result is applied under a fresh acquisition. Holding
//! the lock across a slow refresh would serialize every caller behind one
//! in-flight HTTP request.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use kirobridge_core::{BanPolicy, Credential, CredentialStatus, CredentialSummary, UsageSnapshot};
use kirobridge_wire::{OutcomeSink, PortalClient, RefreshedTokens, WireError};

use crate::error::StoreError;
use crate::store::CredentialStore;

// ============================================================================
// Token Refresher
// ============================================================================

/// The narrow refresh capability the pool consumes.
///
/// Supplied by the token-issuance collaborator; the pool never talks to
/// the portal directly.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Rotates the access token for a credential.
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedTokens, WireError>;
}

#[async_trait]
impl TokenRefresher for PortalClient {
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedTokens, WireError> {
        self.refresh_token(credential).await
    }
}

// ============================================================================
// Pool Status
// ============================================================================

/// Snapshot of pool health for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Total credentials in the pool.
    pub total: usize,
    /// Credentials currently selectable.
    pub available: usize,
    /// Banned credentials.
    pub banned: usize,
    /// Expired (but not banned) credentials.
    pub expired: usize,
    /// Per-credential rows.
    pub credentials: Vec<CredentialSummary>,
}

// ============================================================================
// Credential Pool
// ============================================================================

struct PoolInner {
    credentials: Vec<Credential>,
    cursor: usize,
}

/// Round-robin credential pool with ban detection and refresh
/// orchestration.
pub struct CredentialPool {
    inner: Arc<Mutex<PoolInner>>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    policy: BanPolicy,
}

impl CredentialPool {
    /// Creates an empty pool over a store and a refresh capability.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        policy: BanPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                credentials: Vec::new(),
                cursor: 0,
            })),
            store,
            refresher,
            policy,
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Replaces the credential set from the store.
    ///
    /// Records without an access token are skipped. The set is ordered
    /// healthy first, then expired, then banned, so rotation prefers
    /// credentials that can actually serve. In-flight callers keep the
    /// clones they were handed; the swap never mutates those.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize, StoreError> {
        let records = self.store.list().await?;

        let mut credentials: Vec<Credential> = records
            .iter()
            .filter_map(|(id, record)| record.to_credential(id))
            .collect();
        credentials.sort_by_key(|c| (c.is_banned(), c.is_expired()));

        let count = credentials.len();
        for credential in &credentials {
            let state = if credential.is_banned() {
                "BANNED"
            } else if credential.is_expired() {
                "EXPIRED"
            } else {
                "OK"
            };
            info!(account = %credential.label(), state, "Loaded credential");
        }

        let mut inner = self.inner.lock().await;
        inner.credentials = credentials;
        inner.cursor = 0;
        info!(count, "Credential pool loaded");
        Ok(count)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Returns the next available credential in round-robin order.
    ///
    /// Selection itself counts as a dispatch attempt: the returned
    /// credential's `request_count` and `last_used_at` are updated before
    /// it is handed out. When nothing is available, exactly one
    /// opportunistic refresh of the first expired-not-banned credential is
    /// attempted (with the lock released) before giving up.
    ///
    /// Pool exhaustion is `None`, never an error.
    pub async fn select(&self) -> Option<Credential> {
        let candidate = {
            let mut inner = self.inner.lock().await;
            if let Some(credential) = Self::pick_available(&mut inner) {
                return Some(credential);
            }
            inner
                .credentials
                .iter()
                .find(|c| c.is_expired() && !c.is_banned())
                .cloned()
        };

        let candidate = candidate?;
        debug!(account = %candidate.label(), "Pool empty, attempting opportunistic refresh");

        // Network I/O happens with the lock released.
        match self.refresher.refresh(&candidate).await {
            Ok(tokens) => {
                self.persist_refresh(&candidate.id, &tokens).await;
                let mut inner = self.inner.lock().await;
                Self::apply_refresh(&mut inner, &candidate.id, &tokens);
                Self::pick_available(&mut inner)
            }
            Err(err) => {
                warn!(account = %candidate.label(), error = %err, "Opportunistic refresh failed");
                None
            }
        }
    }

    /// Picks the next available credential and stamps its usage counters.
    ///
    /// The cursor is re-normalized modulo the available subset size on
    /// every call, so bans and expiries between calls can never push it
    /// out of range.
    fn pick_available(inner: &mut PoolInner) -> Option<Credential> {
        let available: Vec<usize> = inner
            .credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_available())
            .map(|(i, _)| i)
            .collect();

        if available.is_empty() {
            return None;
        }

        let slot = inner.cursor % available.len();
        inner.cursor = slot + 1;

        let credential = &mut inner.credentials[available[slot]];
        credential.request_count += 1;
        credential.last_used_at = Some(Utc::now());
        Some(credential.clone())
    }

    // ========================================================================
    // Status Reporting
    // ========================================================================

    /// Records a successful call: the failure streak resets to zero.
    pub async fn report_success(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(credential) = inner.credentials.iter_mut().find(|c| c.id == id) {
            credential.error_count = 0;
            credential.last_error.clear();
        }
    }

    /// Records a failed call and applies ban classification.
    ///
    /// Keyword matches ban immediately; otherwise the failure streak bans
    /// at the policy threshold. An existing ban is sticky: the reason is
    /// never overwritten by later failures.
    pub async fn report_failure(&self, id: &str, message: &str) {
        let mut inner = self.inner.lock().await;
        let Some(credential) = inner.credentials.iter_mut().find(|c| c.id == id) else {
            warn!(id, "Failure reported for unknown credential");
            return;
        };

        credential.error_count += 1;
        credential.last_error = message.to_string();

        if credential.is_banned() {
            return;
        }

        if let Some(keyword) = self.policy.matched_keyword(message) {
            credential.status = CredentialStatus::Banned;
            credential.ban_reason = message.to_string();
            warn!(account = %credential.label(), keyword, "Credential banned");
        } else if self.policy.over_threshold(credential.error_count) {
            credential.status = CredentialStatus::Banned;
            credential.ban_reason = format!("Too many errors: {message}");
            warn!(
                account = %credential.label(),
                errors = credential.error_count,
                "Credential disabled after repeated errors"
            );
        }
    }

    /// Marks a credential's advisory quota as exhausted.
    ///
    /// Not a ban: quota recovers at the reset boundary, suspension does
    /// not.
    pub async fn report_quota_exceeded(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(credential) = inner.credentials.iter_mut().find(|c| c.id == id) {
            credential.quota_used = credential.quota_limit;
            info!(account = %credential.label(), "Credential quota exhausted");
        }
    }

    /// Folds an authoritative usage snapshot into the advisory counters.
    pub async fn record_usage(&self, id: &str, snapshot: &UsageSnapshot) {
        let mut inner = self.inner.lock().await;
        if let Some(credential) = inner.credentials.iter_mut().find(|c| c.id == id) {
            if let Some(resource) = snapshot.primary() {
                credential.quota_used = resource.used;
                credential.quota_limit = resource.limit;
            }
            if credential.email.is_empty() && !snapshot.email.is_empty() {
                credential.email = snapshot.email.clone();
            }
        }
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refreshes every expired-not-banned credential, best-effort.
    ///
    /// Failures are independent: one dead refresh token does not abort the
    /// rest. Returns the number of credentials refreshed.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> usize {
        let candidates: Vec<Credential> = {
            let inner = self.inner.lock().await;
            inner
                .credentials
                .iter()
                .filter(|c| c.is_expired() && !c.is_banned())
                .cloned()
                .collect()
        };

        let mut refreshed = 0;
        for candidate in candidates {
            match self.refresher.refresh(&candidate).await {
                Ok(tokens) => {
                    self.persist_refresh(&candidate.id, &tokens).await;
                    let mut inner = self.inner.lock().await;
                    Self::apply_refresh(&mut inner, &candidate.id, &tokens);
                    info!(account = %candidate.label(), "Refreshed credential");
                    refreshed += 1;
                }
                Err(err) => {
                    warn!(account = %candidate.label(), error = %err, "Refresh failed");
                }
            }
        }
        refreshed
    }

    fn apply_refresh(inner: &mut PoolInner, id: &str, tokens: &RefreshedTokens) {
        if let Some(credential) = inner.credentials.iter_mut().find(|c| c.id == id) {
            credential.access_token = tokens.access_token.clone();
            credential.expires_at = Some(tokens.expires_at);
            if tokens.csrf_token.is_some() {
                credential.csrf_token = tokens.csrf_token.clone();
            }
        }
    }

    /// Writes rotated tokens back to the store, best-effort.
    async fn persist_refresh(&self, id: &str, tokens: &RefreshedTokens) {
        match self.store.get(id).await {
            Ok(mut record) => {
                record.apply_refresh(tokens);
                if let Err(e) = self.store.save(id, &record).await {
                    warn!(id, error = %e, "Failed to persist refreshed tokens");
                }
            }
            Err(e) => warn!(id, error = %e, "Failed to load record for refresh persistence"),
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Snapshot of pool health.
    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        let credentials: Vec<CredentialSummary> =
            inner.credentials.iter().map(Credential::summary).collect();
        PoolStatus {
            total: inner.credentials.len(),
            available: inner.credentials.iter().filter(|c| c.is_available()).count(),
            banned: inner.credentials.iter().filter(|c| c.is_banned()).count(),
            expired: inner
                .credentials
                .iter()
                .filter(|c| c.is_expired() && !c.is_banned())
                .count(),
            credentials,
        }
    }
}

#[async_trait]
impl OutcomeSink for CredentialPool {
    async fn report_success(&self, id: &str) {
        CredentialPool::report_success(self, id).await;
    }

    async fn report_failure(&self, id: &str, message: &str) {
        CredentialPool::report_failure(self, id, message).await;
    }

    async fn report_quota_exceeded(&self, id: &str) {
        CredentialPool::report_quota_exceeded(self, id).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TokenRecord;
    use chrono::Duration;
    use std::collections::HashMap;

    // ------------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------------

    struct MemoryStore {
        records: std::sync::Mutex<HashMap<String, TokenRecord>>,
    }

    impl MemoryStore {
        fn new(records: Vec<(&str, TokenRecord)>) -> Arc<Self> {
            Arc::new(Self {
                records: std::sync::Mutex::new(
                    records
                        .into_iter()
                        .map(|(id, r)| (id.to_string(), r))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn list(&self) -> Result<Vec<(String, TokenRecord)>, StoreError> {
            let mut records: Vec<(String, TokenRecord)> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            records.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(records)
        }

        async fn get(&self, id: &str) -> Result<TokenRecord, StoreError> {
            self.records
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        }

        async fn save(&self, id: &str, record: &TokenRecord) -> Result<(), StoreError> {
            self.records
                .lock()
                .unwrap()
                .insert(id.to_string(), record.clone());
            Ok(())
        }
    }

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(&self, _credential: &Credential) -> Result<RefreshedTokens, WireError> {
            Err(WireError::Unauthorized)
        }
    }

    struct FixedRefresh;

    #[async_trait]
    impl TokenRefresher for FixedRefresh {
        async fn refresh(&self, _credential: &Credential) -> Result<RefreshedTokens, WireError> {
            Ok(RefreshedTokens {
                access_token: "refreshed-token".to_string(),
                csrf_token: Some("fresh-csrf".to_string()),
                expires_at: Utc::now() + Duration::hours(1),
                profile_arn: None,
            })
        }
    }

    fn healthy_record(token: &str) -> TokenRecord {
        TokenRecord {
            access_token: Some(token.to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some((Utc::now() + Duration::hours(1)).to_rfc3339()),
            ..Default::default()
        }
    }

    fn expired_record(token: &str) -> TokenRecord {
        TokenRecord {
            access_token: Some(token.to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some((Utc::now() - Duration::hours(1)).to_rfc3339()),
            csrf_token: Some("csrf".to_string()),
            session_token: Some("session".to_string()),
            ..Default::default()
        }
    }

    async fn pool_with(
        records: Vec<(&str, TokenRecord)>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> CredentialPool {
        let pool = CredentialPool::new(MemoryStore::new(records), refresher, BanPolicy::default());
        pool.load().await.unwrap();
        pool
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_round_robin_visits_each_once() {
        let pool = pool_with(
            vec![
                ("a", healthy_record("t-a")),
                ("b", healthy_record("t-b")),
                ("c", healthy_record("t-c")),
            ],
            Arc::new(NoRefresh),
        )
        .await;

        let first: Vec<String> = [
            pool.select().await.unwrap().id,
            pool.select().await.unwrap().id,
            pool.select().await.unwrap().id,
        ]
        .to_vec();
        assert_eq!(first, vec!["a", "b", "c"]);

        // Second sweep repeats the same stable order
        let second: Vec<String> = [
            pool.select().await.unwrap().id,
            pool.select().await.unwrap().id,
            pool.select().await.unwrap().id,
        ]
        .to_vec();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_select_stamps_usage_counters() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;
        let selected = pool.select().await.unwrap();
        assert_eq!(selected.request_count, 1);
        assert!(selected.last_used_at.is_some());

        pool.select().await.unwrap();
        let status = pool.status().await;
        assert_eq!(status.credentials[0].request_count, 2);
    }

    #[tokio::test]
    async fn test_select_skips_unavailable() {
        let pool = pool_with(
            vec![("a", healthy_record("t-a")), ("b", healthy_record("t-b"))],
            Arc::new(NoRefresh),
        )
        .await;

        pool.report_failure("a", "account suspended").await;
        for _ in 0..5 {
            let selected = pool.select().await.unwrap();
            assert_eq!(selected.id, "b");
            assert!(selected.is_available());
        }
    }

    #[tokio::test]
    async fn test_exhausted_pool_returns_none() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;
        pool.report_failure("a", "blocked by backend").await;
        assert!(pool.select().await.is_none());
    }

    #[tokio::test]
    async fn test_cursor_renormalizes_after_ban() {
        let pool = pool_with(
            vec![
                ("a", healthy_record("t-a")),
                ("b", healthy_record("t-b")),
                ("c", healthy_record("t-c")),
            ],
            Arc::new(NoRefresh),
        )
        .await;

        pool.select().await.unwrap(); // a, cursor now 1
        pool.select().await.unwrap(); // b, cursor now 2
        pool.report_failure("c", "suspended").await;
        // Available subset shrank to [a, b]; cursor 2 wraps to slot 0
        assert_eq!(pool.select().await.unwrap().id, "a");
        assert_eq!(pool.select().await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_select_refreshes_expired_when_pool_empty() {
        let pool = pool_with(vec![("a", expired_record("old"))], Arc::new(FixedRefresh)).await;

        let selected = pool.select().await.unwrap();
        assert_eq!(selected.id, "a");
        assert_eq!(selected.access_token, "refreshed-token");
        assert!(selected.is_available());
    }

    #[tokio::test]
    async fn test_select_gives_up_when_refresh_fails() {
        let pool = pool_with(vec![("a", expired_record("old"))], Arc::new(NoRefresh)).await;
        assert!(pool.select().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_persists_to_store() {
        let store = MemoryStore::new(vec![("a", expired_record("old"))]);
        let pool = CredentialPool::new(store.clone(), Arc::new(FixedRefresh), BanPolicy::default());
        pool.load().await.unwrap();

        pool.select().await.unwrap();
        let record = store.get("a").await.unwrap();
        assert_eq!(record.access_token.as_deref(), Some("refreshed-token"));
        assert_eq!(record.csrf_token.as_deref(), Some("fresh-csrf"));
    }

    #[tokio::test]
    async fn test_concurrent_selects_stay_fair() {
        let pool = Arc::new(
            pool_with(
                vec![
                    ("a", healthy_record("t-a")),
                    ("b", healthy_record("t-b")),
                    ("c", healthy_record("t-c")),
                    ("d", healthy_record("t-d")),
                ],
                Arc::new(NoRefresh),
            )
            .await,
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.select().await.unwrap().id }));
        }

        let mut ids: Vec<String> = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    // ------------------------------------------------------------------------
    // Ban classification
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_threshold_ban_on_fifth_failure() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;

        for i in 1..=4 {
            pool.report_failure("a", "connection reset by peer").await;
            let status = pool.status().await;
            assert!(!status.credentials[0].is_banned, "banned too early at {i}");
            assert_eq!(status.credentials[0].error_count, i);
        }

        pool.report_failure("a", "connection reset by peer").await;
        let status = pool.status().await;
        assert!(status.credentials[0].is_banned);
        assert!(status.credentials[0].ban_reason.starts_with("Too many errors"));
    }

    #[tokio::test]
    async fn test_keyword_bans_immediately() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;
        pool.report_failure("a", "Forbidden").await;
        let status = pool.status().await;
        assert!(status.credentials[0].is_banned);
        assert_eq!(status.credentials[0].ban_reason, "Forbidden");
        assert_eq!(status.credentials[0].error_count, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;

        for _ in 0..4 {
            pool.report_failure("a", "connection reset by peer").await;
        }
        pool.report_success("a").await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].error_count, 0);

        // The next failure starts counting from 1, not from the pre-reset total
        pool.report_failure("a", "connection reset by peer").await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].error_count, 1);
        assert!(!status.credentials[0].is_banned);
    }

    #[tokio::test]
    async fn test_ban_reason_is_sticky() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;
        pool.report_failure("a", "account suspended").await;
        pool.report_failure("a", "unauthorized").await;
        let status = pool.status().await;
        assert_eq!(status.credentials[0].ban_reason, "account suspended");
        // Later failures still count, they just cannot re-ban
        assert_eq!(status.credentials[0].error_count, 2);
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_not_a_ban() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;
        pool.report_quota_exceeded("a").await;
        let status = pool.status().await;
        assert!(!status.credentials[0].is_banned);
        assert_eq!(status.credentials[0].quota_used, status.credentials[0].quota_limit);
        // Still selectable: quota is advisory
        assert!(pool.select().await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_credential_reports_are_ignored() {
        let pool = pool_with(vec![("a", healthy_record("t"))], Arc::new(NoRefresh)).await;
        pool.report_failure("ghost", "suspended").await;
        pool.report_success("ghost").await;
        let status = pool.status().await;
        assert_eq!(status.total, 1);
        assert!(!status.credentials[0].is_banned);
    }

    // ------------------------------------------------------------------------
    // Load / refresh_all / status
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_load_orders_expired_last() {
        let pool = pool_with(
            vec![
                ("a", expired_record("t-a")),
                ("b", healthy_record("t-b")),
                ("c", expired_record("t-c")),
                ("d", healthy_record("t-d")),
            ],
            Arc::new(NoRefresh),
        )
        .await;

        let status = pool.status().await;
        assert_eq!(status.total, 4);
        assert_eq!(status.available, 2);
        assert_eq!(status.expired, 2);
        // Healthy credentials come first in the rotation order
        assert!(!status.credentials[0].is_expired);
        assert!(!status.credentials[1].is_expired);
        assert!(status.credentials[2].is_expired);
    }

    #[tokio::test]
    async fn test_load_skips_records_without_token() {
        let pool = pool_with(
            vec![
                ("a", healthy_record("t")),
                ("empty", TokenRecord::default()),
            ],
            Arc::new(NoRefresh),
        )
        .await;
        assert_eq!(pool.status().await.total, 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_set_without_touching_clones() {
        let store = MemoryStore::new(vec![("a", healthy_record("t-1"))]);
        let pool = CredentialPool::new(store.clone(), Arc::new(NoRefresh), BanPolicy::default());
        pool.load().await.unwrap();

        let in_flight = pool.select().await.unwrap();
        assert_eq!(in_flight.access_token, "t-1");

        store.save("a", &healthy_record("t-2")).await.unwrap();
        pool.load().await.unwrap();

        // The in-flight clone is untouched; new selections see the new set
        assert_eq!(in_flight.access_token, "t-1");
        assert_eq!(pool.select().await.unwrap().access_token, "t-2");
    }

    #[tokio::test]
    async fn test_refresh_all_is_best_effort() {
        struct FlakyRefresh;

        #[async_trait]
        impl TokenRefresher for FlakyRefresh {
            async fn refresh(&self, credential: &Credential) -> Result<RefreshedTokens, WireError> {
                if credential.id == "bad" {
                    Err(WireError::Unauthorized)
                } else {
                    Ok(RefreshedTokens {
                        access_token: "refreshed-token".to_string(),
                        csrf_token: None,
                        expires_at: Utc::now() + Duration::hours(1),
                        profile_arn: None,
                    })
                }
            }
        }

        let pool = pool_with(
            vec![
                ("bad", expired_record("t-bad")),
                ("good-1", expired_record("t-1")),
                ("good-2", expired_record("t-2")),
                ("fresh", healthy_record("t-3")),
            ],
            Arc::new(FlakyRefresh),
        )
        .await;

        // One failure does not abort the rest; fresh credentials are skipped
        assert_eq!(pool.refresh_all().await, 2);
        let status = pool.status().await;
        assert_eq!(status.available, 3);
    }

    // ------------------------------------------------------------------------
    // End-to-end scenario
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_two_credential_scenario() {
        let pool = pool_with(
            vec![("a", healthy_record("t-a")), ("b", healthy_record("t-b"))],
            Arc::new(NoRefresh),
        )
        .await;

        // Both healthy: two selects hit each once
        let first = pool.select().await.unwrap();
        let second = pool.select().await.unwrap();
        assert_ne!(first.id, second.id);

        // Five non-keyword failures ban the first on the 5th
        for _ in 0..5 {
            pool.report_failure(&first.id, "stream closed unexpectedly").await;
        }
        let status = pool.status().await;
        let row = status
            .credentials
            .iter()
            .find(|c| c.error_count == 5)
            .unwrap();
        assert!(row.is_banned);

        // Subsequent selects only return the survivor
        for _ in 0..4 {
            assert_eq!(pool.select().await.unwrap().id, second.id);
        }
    }
}
