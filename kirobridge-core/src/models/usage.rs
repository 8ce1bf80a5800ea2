//! Usage-related types.
//!
//! This module contains the normalized shape of the usage-query backend's
//! response:
//! - [`UsageSnapshot`] - Account identity, subscription tier, and resources
//! - [`ResourceUsage`] - One metered resource with trial and bonus grants
//!
//! The wire-format mapping lives in the protocol client; these types carry
//! only decoded, validated data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Usage Snapshot
// ============================================================================

/// A snapshot of account identity, subscription tier, and quota usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Account email, if the backend returned one.
    pub email: String,
    /// Opaque backend user id.
    pub user_id: String,
    /// Subscription tier (e.g. "Free", "PRO").
    pub subscription_tier: String,
    /// Human-readable subscription title.
    pub subscription_title: String,
    /// Days until the quota window resets.
    pub days_until_reset: i64,
    /// Metered resources, in backend order.
    pub resources: Vec<ResourceUsage>,
    /// When this snapshot was fetched.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl UsageSnapshot {
    /// Returns true if the subscription tier is a paid one.
    pub fn is_pro(&self) -> bool {
        self.subscription_tier.to_ascii_uppercase().contains("PRO")
    }

    /// The primary metered resource, if any.
    pub fn primary(&self) -> Option<&ResourceUsage> {
        self.resources.first()
    }

    /// Total remaining units across all resources, trials, and active
    /// bonus grants.
    pub fn total_remaining(&self) -> u64 {
        self.resources.iter().map(ResourceUsage::total_remaining).sum()
    }
}

// ============================================================================
// Resource Usage
// ============================================================================

/// One metered resource from the usage breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Quota ceiling for the current window.
    pub limit: u64,
    /// Units consumed in the current window.
    pub used: u64,
    /// Display name the backend attaches to this resource.
    pub display_name: String,
    /// Backend resource type tag.
    pub resource_type: String,
    /// When the current window resets.
    pub next_reset: Option<DateTime<Utc>>,
    /// Free-trial sub-grant, if one is attached.
    pub trial: Option<TrialInfo>,
    /// Promotional bonus grants.
    pub bonuses: Vec<BonusGrant>,
}

impl ResourceUsage {
    /// Units remaining in the main quota.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Main quota consumption as a percentage.
    pub fn percent_used(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = (self.used as f64 / self.limit as f64) * 100.0;
        percent
    }

    /// Units remaining in the trial grant.
    pub fn trial_remaining(&self) -> u64 {
        self.trial.as_ref().map_or(0, TrialInfo::remaining)
    }

    /// Units remaining across active bonus grants.
    pub fn bonus_remaining(&self) -> u64 {
        self.bonuses
            .iter()
            .filter(|b| b.is_active())
            .map(BonusGrant::remaining)
            .sum()
    }

    /// Total remaining: main quota plus trial plus active bonuses.
    pub fn total_remaining(&self) -> u64 {
        self.remaining() + self.trial_remaining() + self.bonus_remaining()
    }
}

// ============================================================================
// Trial & Bonus Grants
// ============================================================================

/// Free-trial sub-grant attached to a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialInfo {
    /// Trial quota ceiling.
    pub limit: u64,
    /// Trial units consumed.
    pub used: u64,
    /// Backend trial status tag.
    pub status: String,
    /// When the trial expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TrialInfo {
    /// Units remaining in the trial.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// Promotional bonus grant attached to a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BonusGrant {
    /// Bonus code that minted this grant.
    pub code: String,
    /// Display name the backend attaches to the grant.
    pub display_name: String,
    /// Grant quota ceiling.
    pub limit: u64,
    /// Grant units consumed.
    pub used: u64,
    /// Backend grant status tag.
    pub status: String,
    /// When the grant expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BonusGrant {
    /// Returns true while the backend reports the grant as active.
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }

    /// Units remaining in the grant.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> ResourceUsage {
        ResourceUsage {
            limit: 500,
            used: 120,
            display_name: "Credits".to_string(),
            resource_type: "CREDIT".to_string(),
            next_reset: None,
            trial: Some(TrialInfo {
                limit: 100,
                used: 40,
                status: "ACTIVE".to_string(),
                expires_at: None,
            }),
            bonuses: vec![
                BonusGrant {
                    code: "WELCOME".to_string(),
                    display_name: "Welcome bonus".to_string(),
                    limit: 50,
                    used: 10,
                    status: "ACTIVE".to_string(),
                    expires_at: None,
                },
                BonusGrant {
                    code: "EXPIRED".to_string(),
                    display_name: "Old bonus".to_string(),
                    limit: 50,
                    used: 0,
                    status: "EXPIRED".to_string(),
                    expires_at: None,
                },
            ],
        }
    }

    #[test]
    fn test_remaining_math() {
        let r = resource();
        assert_eq!(r.remaining(), 380);
        assert_eq!(r.trial_remaining(), 60);
        // Only the ACTIVE bonus counts
        assert_eq!(r.bonus_remaining(), 40);
        assert_eq!(r.total_remaining(), 480);
    }

    #[test]
    fn test_remaining_saturates() {
        let mut r = resource();
        r.used = 9999;
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_percent_used() {
        let r = resource();
        assert!((r.percent_used() - 24.0).abs() < f64::EPSILON);

        let empty = ResourceUsage::default();
        assert!(empty.percent_used().abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_totals() {
        let snapshot = UsageSnapshot {
            subscription_tier: "PRO".to_string(),
            resources: vec![resource()],
            ..Default::default()
        };
        assert!(snapshot.is_pro());
        assert_eq!(snapshot.total_remaining(), 480);
        assert_eq!(snapshot.primary().unwrap().display_name, "Credits");
    }

    #[test]
    fn test_free_tier_is_not_pro() {
        let snapshot = UsageSnapshot {
            subscription_tier: "Free".to_string(),
            ..Default::default()
        };
        assert!(!snapshot.is_pro());
    }
}
