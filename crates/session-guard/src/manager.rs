//! Session creation, validation, and teardown.

use crate::session::{
    agent_summary, device_kind, BackendSession, BackendUser, SecureSessionData, SecurityEvent,
    SessionDescriptor, SessionEventKind, SESSION_ID_BYTES,
};
use crate::{SessionError, SessionResult};
use client_config_and_utils::{Clock, SecurityConfig};
use client_storage::{KeyValueStore, SecureStore, StorageKeys};
use device_fingerprint::{similarity, FingerprintGenerator};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Risk grade attached to a validation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityRisk {
    Low,
    Medium,
    Critical,
}

/// What the caller should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Allow,
    Block,
}

/// Outcome of validating a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionValidation {
    pub is_valid: bool,
    pub requires_refresh: bool,
    pub security_risk: SecurityRisk,
    pub action: SessionAction,
    pub error: Option<String>,
}

impl SessionValidation {
    fn allowed(requires_refresh: bool, risk: SecurityRisk) -> Self {
        Self {
            is_valid: true,
            requires_refresh,
            security_risk: risk,
            action: SessionAction::Allow,
            error: None,
        }
    }

    fn blocked(error: impl Into<String>, risk: SecurityRisk) -> Self {
        Self {
            is_valid: false,
            requires_refresh: false,
            security_risk: risk,
            action: SessionAction::Block,
            error: Some(error.into()),
        }
    }
}

struct ManagerInner {
    config: Arc<SecurityConfig>,
    clock: Arc<dyn Clock>,
    secure: Arc<SecureStore>,
    raw: Arc<dyn KeyValueStore>,
    fingerprints: Arc<FingerprintGenerator>,
    current_session: Mutex<Option<String>>,
}

/// Session security manager.
///
/// Payloads are sealed through the secure store; the per-user index and
/// the current-session pointer are plain keys in the same backend.
/// Anything that fails to load during validation is treated as absent,
/// which blocks: this side of the stack fails closed.
pub struct SessionManager {
    inner: Arc<ManagerInner>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: Arc<SecurityConfig>,
        secure: Arc<SecureStore>,
        raw: Arc<dyn KeyValueStore>,
        fingerprints: Arc<FingerprintGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                clock,
                secure,
                raw,
                fingerprints,
                current_session: Mutex::new(None),
            }),
            sweep: Mutex::new(None),
        }
    }

    /// Create and persist a session for a freshly verified sign-in.
    ///
    /// Captures the device fingerprint, appends the initial login
    /// event, and indexes the session under the user. If the user is at
    /// the concurrency cap, the oldest session is invalidated first.
    pub fn create_session(
        &self,
        user: &BackendUser,
        backend: &BackendSession,
        role: impl Into<String>,
        permissions: Vec<String>,
    ) -> SessionResult<SecureSessionData> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let session_id = generate_session_id();
        let fingerprint = inner.fingerprints.generate();

        let session = SecureSessionData {
            session_id: session_id.clone(),
            user_id: user.id.clone(),
            role: role.into(),
            permissions,
            created_at: now,
            last_activity: now,
            expires_at: now + inner.config.session_timeout(),
            fingerprint,
            security_events: vec![SecurityEvent::new(SessionEventKind::Login, now, None)],
            is_active: true,
            access_token: backend.access_token.clone(),
        };

        let mut index = inner.load_index(&user.id);
        index.retain(|id| {
            inner
                .secure
                .get_secure::<SecureSessionData>(&session_key(id))
                .is_some()
        });
        while index.len() >= inner.config.max_concurrent_sessions {
            let oldest = index.remove(0);
            inner.drop_session_payload(&oldest)?;
            info!(
                session = short_id(&oldest),
                user = %user.id,
                reason = ?SessionEventKind::ConcurrentLimit,
                "evicted oldest session over the concurrency cap"
            );
        }

        inner.secure.set_secure(&session_key(&session_id), &session)?;
        index.push(session_id.clone());
        inner.store_index(&user.id, &index)?;
        inner.set_current(&session_id)?;
        debug!(session = short_id(&session_id), user = %user.id, "session created");
        Ok(session)
    }

    /// Validate a session id.
    ///
    /// Checks run in order: existence, expiry, fingerprint drift,
    /// refresh window. Drift beyond the similarity threshold is graded
    /// critical, blocks, and invalidates the session on the spot. A
    /// payload that was present but got discarded by the read path is
    /// graded critical too; the caller-facing reason stays
    /// "Session not found" either way.
    pub fn validate_session(&self, session_id: &str) -> SessionValidation {
        let inner = &self.inner;
        let now = inner.clock.now();
        let raw_key = format!(
            "{}{}",
            StorageKeys::SECURE_PREFIX,
            session_key(session_id)
        );
        let was_present = inner.raw.has(&raw_key).unwrap_or(false);
        let Some(session) = inner.load_session(session_id) else {
            if was_present {
                warn!(
                    session = short_id(session_id),
                    reason = ?SessionEventKind::TamperDetected,
                    "sealed session payload was discarded at read"
                );
                return SessionValidation::blocked("Session not found", SecurityRisk::Critical);
            }
            return SessionValidation::blocked("Session not found", SecurityRisk::Low);
        };
        if !session.is_active {
            return SessionValidation::blocked("Session inactive", SecurityRisk::Low);
        }
        if session.is_expired(now) {
            if let Err(err) = inner.invalidate(session_id, SessionEventKind::Expired) {
                warn!(error = %err, "could not clear expired session");
            }
            return SessionValidation::blocked("Session expired", SecurityRisk::Low);
        }
        if inner.config.fingerprinting_enabled && session.fingerprint.stable {
            let current = inner.fingerprints.generate();
            if current.hash != session.fingerprint.hash {
                let stored = session.fingerprint.components.canonical_components();
                let live = current.components.canonical_components();
                let score = similarity(&stored, &live);
                if score < inner.config.fingerprint_similarity_threshold {
                    warn!(
                        session = short_id(session_id),
                        similarity = score,
                        "fingerprint drift beyond tolerance, blocking session"
                    );
                    if let Err(err) =
                        inner.invalidate(session_id, SessionEventKind::FingerprintMismatch)
                    {
                        warn!(error = %err, "could not clear drifted session");
                    }
                    return SessionValidation::blocked(
                        "Device fingerprint mismatch",
                        SecurityRisk::Critical,
                    );
                }
            }
        }
        let requires_refresh = session.expires_at - now <= inner.config.refresh_threshold();
        if requires_refresh {
            SessionValidation::allowed(true, SecurityRisk::Medium)
        } else {
            SessionValidation::allowed(false, SecurityRisk::Low)
        }
    }

    /// Extend a live session and record the refresh.
    ///
    /// This is the one deliberately fallible lookup: refreshing a
    /// session that does not exist (or has already died) is a caller
    /// bug, not a routine negative.
    pub fn refresh_session(&self, session_id: &str) -> SessionResult<SecureSessionData> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let Some(mut session) = inner.load_session(session_id) else {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        };
        if !session.is_active || session.is_expired(now) {
            if let Err(err) = inner.invalidate(session_id, SessionEventKind::Expired) {
                warn!(error = %err, "could not clear expired session");
            }
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        session.expires_at = now + inner.config.session_timeout();
        session.last_activity = now;
        session
            .security_events
            .push(SecurityEvent::new(SessionEventKind::Refresh, now, None));
        inner.secure.set_secure(&session_key(session_id), &session)?;
        debug!(session = short_id(session_id), "session refreshed");
        Ok(session)
    }

    /// Remove a session from storage and its user index. Idempotent:
    /// invalidating an absent session is a no-op.
    pub fn invalidate_session(
        &self,
        session_id: &str,
        reason: SessionEventKind,
    ) -> SessionResult<()> {
        self.inner.invalidate(session_id, reason)
    }

    /// Load a session without validating it.
    pub fn get_session(&self, session_id: &str) -> Option<SecureSessionData> {
        self.inner.load_session(session_id)
    }

    /// Session id driving this client, surviving restarts through the
    /// backing store.
    pub fn current_session_id(&self) -> Option<String> {
        self.inner.current_session_id()
    }

    /// Lightweight descriptors of a user's sessions, for a "your
    /// devices" listing. No fingerprints, no tokens.
    pub fn concurrent_sessions(&self, user_id: &str) -> Vec<SessionDescriptor> {
        let inner = &self.inner;
        let current = inner.current_session_id();
        inner
            .load_index(user_id)
            .iter()
            .filter_map(|id| {
                let session = inner.load_session(id)?;
                Some(SessionDescriptor {
                    session_id: session.session_id.clone(),
                    device_kind: device_kind(&session.fingerprint.components).to_string(),
                    agent_summary: agent_summary(&session.fingerprint.components.agent),
                    platform: session.fingerprint.components.platform.clone(),
                    created_at: session.created_at,
                    last_activity: session.last_activity,
                    is_current_session: current.as_deref() == Some(id.as_str()),
                })
            })
            .collect()
    }

    /// Sign out everywhere else. Returns how many sessions went.
    pub fn invalidate_all_other_sessions(
        &self,
        user_id: &str,
        current_id: &str,
    ) -> SessionResult<usize> {
        let index = self.inner.load_index(user_id);
        let mut removed = 0;
        for id in index {
            if id != current_id {
                self.inner.invalidate(&id, SessionEventKind::Logout)?;
                removed += 1;
            }
        }
        info!(user = %user_id, removed, "invalidated other sessions");
        Ok(removed)
    }

    /// Drop every expired session. Returns how many were removed. The
    /// background sweep calls this on its interval.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired()
    }

    /// Start the periodic expired-session sweep. No-op if running.
    pub fn start_sweep(&self) {
        let mut slot = self.sweep.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let period =
            std::time::Duration::from_millis(self.inner.config.session_cleanup_interval_ms.max(1));
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = inner.cleanup_expired();
                if removed > 0 {
                    debug!(removed, "session sweep removed expired sessions");
                }
            }
        }));
    }

    /// Stop the sweep. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweep.lock().unwrap().take() {
            handle.abort();
            debug!("session sweep stopped");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl ManagerInner {
    fn load_session(&self, session_id: &str) -> Option<SecureSessionData> {
        self.secure.get_secure(&session_key(session_id))
    }

    fn load_index(&self, user_id: &str) -> Vec<String> {
        match self.raw.get(&index_key(user_id)) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(index) => index,
                Err(err) => {
                    warn!(error = %err, "discarding unreadable session index");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "could not read session index");
                Vec::new()
            }
        }
    }

    fn store_index(&self, user_id: &str, index: &[String]) -> SessionResult<()> {
        if index.is_empty() {
            self.raw.remove(&index_key(user_id))?;
            return Ok(());
        }
        let json = serde_json::to_string(index)?;
        self.raw.set(&index_key(user_id), &json)?;
        Ok(())
    }

    fn current_session_id(&self) -> Option<String> {
        if let Some(id) = self.current_session.lock().unwrap().clone() {
            return Some(id);
        }
        match self.raw.get(StorageKeys::CURRENT_SESSION) {
            Ok(Some(id)) => {
                *self.current_session.lock().unwrap() = Some(id.clone());
                Some(id)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "could not read current session pointer");
                None
            }
        }
    }

    fn set_current(&self, session_id: &str) -> SessionResult<()> {
        *self.current_session.lock().unwrap() = Some(session_id.to_string());
        self.raw.set(StorageKeys::CURRENT_SESSION, session_id)?;
        Ok(())
    }

    /// Remove the sealed payload and, if it was current, the pointer.
    /// Leaves the user index to the caller.
    fn drop_session_payload(&self, session_id: &str) -> SessionResult<bool> {
        let existed = self.secure.remove(&session_key(session_id))?;
        if self.current_session_id().as_deref() == Some(session_id) {
            *self.current_session.lock().unwrap() = None;
            if let Err(err) = self.raw.remove(StorageKeys::CURRENT_SESSION) {
                warn!(error = %err, "could not clear current session pointer");
            }
        }
        Ok(existed)
    }

    fn invalidate(&self, session_id: &str, reason: SessionEventKind) -> SessionResult<()> {
        let session = self.load_session(session_id);
        let existed = self.drop_session_payload(session_id)?;
        if let Some(session) = session {
            let mut index = self.load_index(&session.user_id);
            index.retain(|id| id != session_id);
            self.store_index(&session.user_id, &index)?;
        }
        if existed {
            info!(session = short_id(session_id), reason = ?reason, "session invalidated");
        }
        Ok(())
    }

    fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let prefix = format!("{}{}", StorageKeys::SECURE_PREFIX, StorageKeys::SESSION_PREFIX);
        let keys = match self.raw.keys_with_prefix(&prefix) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "could not scan sessions for cleanup");
                return 0;
            }
        };
        let mut removed = 0;
        for raw_key in keys {
            let logical = raw_key[StorageKeys::SECURE_PREFIX.len()..].to_string();
            match self.secure.get_secure::<SecureSessionData>(&logical) {
                Some(session) if session.is_expired(now) => {
                    match self.invalidate(&session.session_id, SessionEventKind::Expired) {
                        Ok(()) => removed += 1,
                        Err(err) => warn!(error = %err, "could not remove expired session"),
                    }
                }
                Some(_) => {}
                // The read path already purged it (stale or tampered).
                None => removed += 1,
            }
        }
        removed
    }
}

fn session_key(session_id: &str) -> String {
    format!("{}{}", StorageKeys::SESSION_PREFIX, session_id)
}

fn index_key(user_id: &str) -> String {
    format!("{}{}", StorageKeys::SESSION_INDEX_PREFIX, user_id)
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}
