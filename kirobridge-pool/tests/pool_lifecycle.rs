//! End-to-end pool lifecycle over the file-backed store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use kirobridge_core::{BanPolicy, Credential};
use kirobridge_pool::{CredentialPool, CredentialStore, FileCredentialStore, TokenRecord, TokenRefresher};
use kirobridge_wire::{RefreshedTokens, WireError};

struct StubRefresher;

#[async_trait]
impl TokenRefresher for StubRefresher {
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedTokens, WireError> {
        if credential.refresh_token.is_empty() {
            return Err(WireError::Unauthorized);
        }
        Ok(RefreshedTokens {
            access_token: format!("rotated-{}", credential.id),
            csrf_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            profile_arn: None,
        })
    }
}

fn record(token: &str, hours_from_now: i64) -> TokenRecord {
    TokenRecord {
        access_token: Some(token.to_string()),
        refresh_token: Some("refresh".to_string()),
        expires_at: Some((Utc::now() + Duration::hours(hours_from_now)).to_rfc3339()),
        email: Some(format!("{token}@example.com")),
        idp: Some("Google".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn pool_lifecycle_over_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path().join("tokens")));

    store.save("alpha", &record("t-alpha", 1)).await.unwrap();
    store.save("beta", &record("t-beta", 1)).await.unwrap();
    store.save("stale", &record("t-stale", -1)).await.unwrap();

    let pool = CredentialPool::new(store.clone(), Arc::new(StubRefresher), BanPolicy::default());
    assert_eq!(pool.load().await.unwrap(), 3);

    let status = pool.status().await;
    assert_eq!(status.total, 3);
    assert_eq!(status.available, 2);
    assert_eq!(status.expired, 1);

    // Rotation covers both healthy credentials before repeating
    let first = pool.select().await.unwrap();
    let second = pool.select().await.unwrap();
    assert_ne!(first.id, second.id);
    assert!(first.is_available());
    assert!(second.is_available());

    // A keyword failure bans one immediately and rotation adapts
    pool.report_failure(&first.id, "AccountSuspendedException: blocked").await;
    let third = pool.select().await.unwrap();
    assert_eq!(third.id, second.id);

    // refresh_all rotates the stale credential and persists the new token
    assert_eq!(pool.refresh_all().await, 1);
    let rotated = store.get("stale").await.unwrap();
    assert_eq!(rotated.access_token.as_deref(), Some("rotated-stale"));

    let status = pool.status().await;
    assert_eq!(status.available, 2);
    assert_eq!(status.banned, 1);
    assert_eq!(status.expired, 0);

    // Reload rebuilds from disk: the runtime ban is gone, the rotated
    // token survives
    assert_eq!(pool.load().await.unwrap(), 3);
    let status = pool.status().await;
    assert_eq!(status.banned, 0);
    assert_eq!(status.available, 3);
}
