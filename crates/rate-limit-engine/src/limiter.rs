//! The rate limiter service.

use crate::operation::{Operation, OperationPolicy, PolicySet};
use crate::records::{AttemptRecord, FailureCount, LockoutRecord};
use chrono::{DateTime, Utc};
use client_config_and_utils::{Clock, SecurityConfig};
use client_storage::{KeyValueStore, StorageKeys};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Who is asking. `client_id` keys the per-operation counter (an email,
/// a device id); `user_id` keys account lockout aggregation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_id: String,
    pub ip_address: Option<String>,
    pub user_id: Option<String>,
}

impl RequestContext {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Outcome of an allowance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Attempts left before a block. `u32::MAX` for admin overrides.
    pub remaining_attempts: u32,
    /// Advisory backoff before the next attempt; never enforced here.
    pub retry_delay: Option<StdDuration>,
    pub block_expires: Option<DateTime<Utc>>,
    pub account_locked: bool,
    pub account_lock_expires: Option<DateTime<Utc>>,
}

impl Decision {
    fn allow(remaining: u32, retry_delay: Option<StdDuration>) -> Self {
        Self {
            allowed: true,
            remaining_attempts: remaining,
            retry_delay,
            block_expires: None,
            account_locked: false,
            account_lock_expires: None,
        }
    }

    fn blocked(expires: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            retry_delay: None,
            block_expires: expires,
            account_locked: false,
            account_lock_expires: None,
        }
    }

    fn locked(expires: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            retry_delay: None,
            block_expires: None,
            account_locked: true,
            account_lock_expires: Some(expires),
        }
    }

    fn admin() -> Self {
        Self {
            allowed: true,
            remaining_attempts: u32::MAX,
            retry_delay: None,
            block_expires: None,
            account_locked: false,
            account_lock_expires: None,
        }
    }
}

/// Read-only view of one (operation, identifier) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterStatus {
    pub operation: Operation,
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub is_blocked: bool,
    pub block_expires: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub has_admin_override: bool,
    pub account_locked: bool,
}

/// Aggregate counts across the limiter's records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimiterMetrics {
    pub tracked_identifiers: usize,
    pub blocked_records: usize,
    pub locked_accounts: usize,
    pub verified_users: usize,
    pub admin_overrides: usize,
}

/// Client-side attempt limiter with account lockout escalation.
///
/// Calls never fail: any storage error is logged and the limiter fails
/// open, treating the caller as allowed and the write as done. Check
/// and record are separate calls with storage in between, so two
/// interleaved callers can both see "allowed" before either records;
/// the counters are advisory, the backend enforces.
pub struct RateLimiter {
    config: Arc<SecurityConfig>,
    policies: PolicySet,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    verified_users: Mutex<HashSet<String>>,
    admin_overrides: Mutex<HashSet<String>>,
}

impl RateLimiter {
    pub fn new(
        config: Arc<SecurityConfig>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policies = PolicySet::from_config(&config);
        Self {
            config,
            policies,
            store,
            clock,
            verified_users: Mutex::new(HashSet::new()),
            admin_overrides: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the policy for one operation.
    pub fn with_policy(mut self, operation: Operation, policy: OperationPolicy) -> Self {
        self.policies.set_override(operation, policy);
        self
    }

    /// Check whether an attempt may proceed. Read-only.
    pub fn is_allowed(&self, operation: Operation, ctx: &RequestContext) -> Decision {
        if self.context_has_admin_override(ctx) {
            return Decision::admin();
        }
        let now = self.clock.now();

        if let Some(user_id) = ctx.user_id.as_deref() {
            if let Some(lock) = self.load_lockout(user_id) {
                if lock.is_active(now) {
                    return Decision::locked(lock.lock_expires);
                }
                self.remove_key(&failure_key(user_id));
                self.remove_key(&lockout_key(user_id));
            }
        }

        let policy = self.policies.policy(operation);
        let max = self.effective_max(policy.max_attempts, ctx);
        let Some(record) = self.load_attempts(&attempt_key(operation, &ctx.client_id)) else {
            return Decision::allow(max, None);
        };
        if let Some(until) = record.active_block(now) {
            return Decision::blocked(Some(until));
        }
        if record.blocked_until.is_some() || record.window_expired(now, policy.window) {
            // Lapsed block or lapsed window: full allowance again.
            return Decision::allow(max, None);
        }
        let remaining = max.saturating_sub(record.count);
        if remaining == 0 {
            return Decision::blocked(record.blocked_until);
        }
        let retry_delay = (record.count > 0).then(|| self.progressive_delay(record.count));
        Decision::allow(remaining, retry_delay)
    }

    /// Record the outcome of an attempt.
    ///
    /// Failures increment the pair's counter and the user's cumulative
    /// failure count. A success clears the pair's counter when the
    /// policy says so, and never touches the cumulative count; only a
    /// fired lockout's expiry or [`unlock_account`](Self::unlock_account)
    /// resets that.
    pub fn record_attempt(&self, operation: Operation, success: bool, ctx: &RequestContext) {
        if self.context_has_admin_override(ctx) {
            return;
        }
        let now = self.clock.now();
        let policy = self.policies.policy(operation).clone();
        let max = self.effective_max(policy.max_attempts, ctx);
        let key = attempt_key(operation, &ctx.client_id);

        let mut record = self
            .load_attempts(&key)
            .unwrap_or_else(|| AttemptRecord::fresh(&key, now));
        if record.active_block(now).is_none()
            && (record.blocked_until.is_some() || record.window_expired(now, policy.window))
        {
            record = AttemptRecord::fresh(&key, now);
        }

        if success && policy.skip_successful_attempts {
            self.remove_key(&key);
            debug!(operation = %operation, "success cleared attempt counter");
            return;
        }

        record.count += 1;
        record.last_attempt_at = now;
        if let Some(ip) = &ctx.ip_address {
            record.ip_addresses.insert(ip.clone());
        }
        if record.count >= max && record.blocked_until.is_none() {
            let until = now + policy.block_duration;
            record.blocked_until = Some(until);
            warn!(
                operation = %operation,
                identifier = %redact(&ctx.client_id),
                until = %until,
                "identifier blocked after repeated attempts"
            );
        }
        self.persist_attempts(&record);

        if !success {
            if let Some(user_id) = ctx.user_id.as_deref() {
                self.record_user_failure(user_id, ctx.ip_address.as_deref(), now);
            }
        }
    }

    /// Clear an account lockout and its failure history immediately.
    pub fn unlock_account(&self, user_id: &str) {
        self.remove_key(&lockout_key(user_id));
        self.remove_key(&failure_key(user_id));
        info!(user = %redact(user_id), "account unlocked");
    }

    /// Double the attempt allowance for an identifier.
    pub fn add_verified_user(&self, id: impl Into<String>) {
        self.verified_users.lock().unwrap().insert(id.into());
    }

    pub fn remove_verified_user(&self, id: &str) {
        self.verified_users.lock().unwrap().remove(id);
    }

    /// Exempt an identifier from every check.
    pub fn add_admin_override(&self, id: impl Into<String>) {
        self.admin_overrides.lock().unwrap().insert(id.into());
    }

    pub fn remove_admin_override(&self, id: &str) {
        self.admin_overrides.lock().unwrap().remove(id);
    }

    pub fn is_verified(&self, id: &str) -> bool {
        self.verified_users.lock().unwrap().contains(id)
    }

    pub fn has_admin_override(&self, id: &str) -> bool {
        self.admin_overrides.lock().unwrap().contains(id)
    }

    /// Introspect one (operation, identifier) pair without mutating it.
    pub fn get_status(&self, operation: Operation, ctx: &RequestContext) -> LimiterStatus {
        let now = self.clock.now();
        let policy = self.policies.policy(operation);
        let max = self.effective_max(policy.max_attempts, ctx);
        let record = self.load_attempts(&attempt_key(operation, &ctx.client_id));
        let (attempts_used, block_expires) = match &record {
            Some(record) => {
                let used = if record.window_expired(now, policy.window) {
                    0
                } else {
                    record.count
                };
                (used, record.active_block(now))
            }
            None => (0, None),
        };
        let account_locked = ctx
            .user_id
            .as_deref()
            .and_then(|id| self.load_lockout(id))
            .is_some_and(|lock| lock.is_active(now));
        LimiterStatus {
            operation,
            attempts_used,
            max_attempts: max,
            is_blocked: block_expires.is_some(),
            block_expires,
            is_verified: self.is_verified(&ctx.client_id)
                || ctx.user_id.as_deref().is_some_and(|id| self.is_verified(id)),
            has_admin_override: self.context_has_admin_override(ctx),
            account_locked,
        }
    }

    /// Aggregate counts across all records. Storage errors yield zeros.
    pub fn get_metrics(&self) -> LimiterMetrics {
        let now = self.clock.now();
        let mut metrics = LimiterMetrics {
            verified_users: self.verified_users.lock().unwrap().len(),
            admin_overrides: self.admin_overrides.lock().unwrap().len(),
            ..Default::default()
        };
        match self.store.keys_with_prefix(StorageKeys::ATTEMPT_PREFIX) {
            Ok(keys) => {
                for key in keys {
                    metrics.tracked_identifiers += 1;
                    if let Some(record) = self.load_attempts(&key) {
                        if record.active_block(now).is_some() {
                            metrics.blocked_records += 1;
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "could not scan attempt records"),
        }
        match self.store.keys_with_prefix(StorageKeys::LOCKOUT_PREFIX) {
            Ok(keys) => {
                for key in keys {
                    if let Ok(Some(json)) = self.store.get(&key) {
                        if let Ok(lock) = serde_json::from_str::<LockoutRecord>(&json) {
                            if lock.is_active(now) {
                                metrics.locked_accounts += 1;
                            }
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "could not scan lockout records"),
        }
        metrics
    }

    fn context_has_admin_override(&self, ctx: &RequestContext) -> bool {
        self.has_admin_override(&ctx.client_id)
            || ctx
                .user_id
                .as_deref()
                .is_some_and(|id| self.has_admin_override(id))
    }

    fn effective_max(&self, base: u32, ctx: &RequestContext) -> u32 {
        let verified = self.is_verified(&ctx.client_id)
            || ctx.user_id.as_deref().is_some_and(|id| self.is_verified(id));
        if verified {
            base.saturating_mul(2)
        } else {
            base
        }
    }

    fn progressive_delay(&self, attempts: u32) -> StdDuration {
        let base = self.config.progressive_delay_base_ms.max(1);
        let cap = self.config.progressive_delay_max_ms.max(base);
        let exponent = attempts.saturating_sub(1).min(31);
        let raw = base.saturating_mul(1u64 << exponent).min(cap);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        StdDuration::from_millis((raw as f64 * jitter).round() as u64)
    }

    fn record_user_failure(&self, user_id: &str, ip: Option<&str>, now: DateTime<Utc>) {
        let mut counter = self
            .load_failures(user_id)
            .unwrap_or_else(|| FailureCount::fresh(user_id, now));
        counter.count += 1;
        counter.updated_at = now;
        if let Some(ip) = ip {
            counter.ip_addresses.insert(ip.to_string());
        }
        if counter.count >= self.config.account_lockout_threshold {
            let lock = LockoutRecord {
                user_id: user_id.to_string(),
                locked_at: now,
                lock_expires: now + self.config.account_lockout_duration(),
                triggering_ips: counter.ip_addresses.clone(),
            };
            self.persist_lockout(&lock);
            self.remove_key(&failure_key(user_id));
            warn!(
                user = %redact(user_id),
                failures = counter.count,
                until = %lock.lock_expires,
                "account locked after cumulative failures"
            );
            return;
        }
        self.persist_failures(&counter);
    }

    fn load_attempts(&self, key: &str) -> Option<AttemptRecord> {
        match self.store.get(key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(error = %err, "discarding unreadable attempt record");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "attempt record read failed, failing open");
                None
            }
        }
    }

    fn load_lockout(&self, user_id: &str) -> Option<LockoutRecord> {
        match self.store.get(&lockout_key(user_id)) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(lock) => Some(lock),
                Err(err) => {
                    warn!(error = %err, "discarding unreadable lockout record");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "lockout read failed, failing open");
                None
            }
        }
    }

    fn load_failures(&self, user_id: &str) -> Option<FailureCount> {
        match self.store.get(&failure_key(user_id)) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(counter) => Some(counter),
                Err(err) => {
                    warn!(error = %err, "discarding unreadable failure counter");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "failure counter read failed, failing open");
                None
            }
        }
    }

    fn persist_attempts(&self, record: &AttemptRecord) {
        match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(err) = self.store.set(&record.key, &json) {
                    warn!(error = %err, "attempt record write failed, failing open");
                }
            }
            Err(err) => warn!(error = %err, "could not serialize attempt record"),
        }
    }

    fn persist_lockout(&self, lock: &LockoutRecord) {
        match serde_json::to_string(lock) {
            Ok(json) => {
                if let Err(err) = self.store.set(&lockout_key(&lock.user_id), &json) {
                    warn!(error = %err, "lockout write failed, failing open");
                }
            }
            Err(err) => warn!(error = %err, "could not serialize lockout record"),
        }
    }

    fn persist_failures(&self, counter: &FailureCount) {
        match serde_json::to_string(counter) {
            Ok(json) => {
                if let Err(err) = self.store.set(&failure_key(&counter.user_id), &json) {
                    warn!(error = %err, "failure counter write failed, failing open");
                }
            }
            Err(err) => warn!(error = %err, "could not serialize failure counter"),
        }
    }

    fn remove_key(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(error = %err, key, "record removal failed, failing open");
        }
    }
}

fn attempt_key(operation: Operation, client_id: &str) -> String {
    format!(
        "{}{}:{}",
        StorageKeys::ATTEMPT_PREFIX,
        operation.as_str(),
        client_id
    )
}

fn lockout_key(user_id: &str) -> String {
    format!("{}{}", StorageKeys::LOCKOUT_PREFIX, user_id)
}

fn failure_key(user_id: &str) -> String {
    format!("{}{}", StorageKeys::FAILURE_COUNT_PREFIX, user_id)
}

/// First eight hex chars of the identifier's SHA-256, for logs.
fn redact(identifier: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(identifier.as_bytes()));
    digest.truncate(8);
    digest
}
