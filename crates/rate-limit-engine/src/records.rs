//! Persisted limiter state.
//!
//! Records are plain JSON in the shared key-value store so any
//! component (or a second client on the same storage) sees the same
//! counters. Blocks and lockouts carry explicit expiry timestamps;
//! expired records are reset lazily the next time they are touched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Failed-attempt counter for one (operation, identifier) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Storage key this record lives under.
    pub key: String,
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    /// Distinct source addresses seen during the window.
    #[serde(default)]
    pub ip_addresses: BTreeSet<String>,
    /// Set once the allowance is spent; cleared on window reset.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub blocked_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    pub fn fresh(key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            count: 0,
            window_start: now,
            last_attempt_at: now,
            ip_addresses: BTreeSet::new(),
            blocked_until: None,
        }
    }

    /// Whether the counting window has lapsed.
    pub fn window_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.window_start >= window
    }

    /// Active block expiry, if any.
    pub fn active_block(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.blocked_until.filter(|until| *until > now)
    }

    /// True when the record holds nothing worth keeping: the window has
    /// lapsed and any block has expired.
    pub fn stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.active_block(now).is_none() && self.window_expired(now, window)
    }
}

/// Account-wide lockout, independent of per-operation blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub user_id: String,
    pub locked_at: DateTime<Utc>,
    pub lock_expires: DateTime<Utc>,
    /// Source addresses seen across the failures that triggered this.
    #[serde(default)]
    pub triggering_ips: BTreeSet<String>,
}

impl LockoutRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.lock_expires > now
    }
}

/// Cumulative failure counter feeding the lockout threshold. Unlike
/// [`AttemptRecord`] this has no window: it only resets when a lockout
/// fires or the account is explicitly unlocked. Successful attempts
/// never clear it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCount {
    pub user_id: String,
    pub count: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ip_addresses: BTreeSet<String>,
}

impl FailureCount {
    pub fn fresh(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            count: 0,
            updated_at: now,
            ip_addresses: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_expiry_boundary() {
        let now = Utc::now();
        let record = AttemptRecord::fresh("k", now);
        let window = Duration::minutes(15);

        assert!(!record.window_expired(now, window));
        assert!(!record.window_expired(now + Duration::minutes(14), window));
        assert!(record.window_expired(now + Duration::minutes(15), window));
    }

    #[test]
    fn test_active_block_clears_after_expiry() {
        let now = Utc::now();
        let mut record = AttemptRecord::fresh("k", now);
        record.blocked_until = Some(now + Duration::minutes(30));

        assert_eq!(record.active_block(now), Some(now + Duration::minutes(30)));
        assert_eq!(record.active_block(now + Duration::minutes(30)), None);
    }

    #[test]
    fn test_stale_requires_both_window_and_block_lapsed() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let mut record = AttemptRecord::fresh("k", now);
        record.blocked_until = Some(now + Duration::minutes(30));

        // Window lapsed but the block is still live.
        assert!(!record.stale(now + Duration::minutes(20), window));
        // Both lapsed.
        assert!(record.stale(now + Duration::minutes(31), window));
    }

    #[test]
    fn test_attempt_record_roundtrips_without_block() {
        let now = Utc::now();
        let mut record = AttemptRecord::fresh("driftline_attempts_sign_in:alice", now);
        record.count = 3;
        record.ip_addresses.insert("10.0.0.1".to_string());
        record.ip_addresses.insert("10.0.0.2".to_string());

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("blocked_until"));
        let back: AttemptRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_lockout_activity() {
        let now = Utc::now();
        let lock = LockoutRecord {
            user_id: "u1".to_string(),
            locked_at: now,
            lock_expires: now + Duration::hours(1),
            triggering_ips: BTreeSet::new(),
        };
        assert!(lock.is_active(now));
        assert!(!lock.is_active(now + Duration::hours(1)));
    }
}
