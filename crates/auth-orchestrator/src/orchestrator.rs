//! Wires the security components together behind one sign-in surface.

use crate::backend::{AuthBackend, BackendError};
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use client_config_and_utils::{Clock, SecurityConfig};
use client_storage::{KeyValueStore, ObfuscationKey, SecureStore};
use csrf_guard::CsrfGuard;
use device_fingerprint::{EnvironmentProbe, FingerprintGenerator};
use rate_limit_engine::{Operation, RateLimiter, RequestContext};
use session_guard::{SecureSessionData, SessionEventKind, SessionManager, SessionValidation};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Auth lifecycle events fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A session was created after successful verification.
    SignedIn { user_id: String, session_id: String },
    /// A session was invalidated by an explicit sign-out.
    SignedOut { session_id: String },
    /// A session was extended.
    TokenRefreshed { session_id: String },
}

/// Result of a sign-in attempt.
///
/// Denials are ordinary values, not errors: the caller renders them.
#[derive(Debug, Clone)]
pub enum SignInOutcome {
    /// Credentials verified and a session created.
    Success { session: SecureSessionData },
    /// The backend rejected the credentials.
    InvalidCredentials { remaining_attempts: u32 },
    /// The limiter refused before the backend was contacted.
    RateLimited {
        retry_delay: Option<StdDuration>,
        block_expires: Option<DateTime<Utc>>,
        account_locked: bool,
    },
}

/// Composition root for the client security stack.
///
/// Owns one instance of each component, built over injected storage,
/// clock, environment probe, and credential backend. Construction
/// validates the configuration and refuses unsound combinations.
pub struct AuthOrchestrator {
    config: Arc<SecurityConfig>,
    backend: Arc<dyn AuthBackend>,
    limiter: Arc<RateLimiter>,
    sessions: Arc<SessionManager>,
    csrf: Arc<CsrfGuard>,
    events: broadcast::Sender<AuthEvent>,
}

impl std::fmt::Debug for AuthOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthOrchestrator {
    pub fn new(
        config: SecurityConfig,
        store: Arc<dyn KeyValueStore>,
        probe: Arc<dyn EnvironmentProbe>,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn AuthBackend>,
    ) -> AuthResult<Self> {
        let issues = config.validate();
        if !issues.is_empty() {
            return Err(AuthError::InvalidConfig(issues));
        }
        let config = Arc::new(config);

        let fingerprints = Arc::new(FingerprintGenerator::new(probe, clock.clone()));
        let device = fingerprints.generate();
        let cipher = if config.encryption_enabled {
            match ObfuscationKey::derive(&device.components.canonical_components()) {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(error = %err, "cipher derivation failed, storing envelopes unencrypted");
                    None
                }
            }
        } else {
            None
        };
        debug!(
            encryption = cipher.is_some(),
            fingerprinting = config.fingerprinting_enabled,
            "security stack wired"
        );

        let secure = Arc::new(SecureStore::new(
            store.clone(),
            clock.clone(),
            cipher,
            config.secure_store_ttl(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.clone(),
            store.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            config.clone(),
            secure,
            store.clone(),
            fingerprints,
            clock.clone(),
        ));
        let csrf = Arc::new(CsrfGuard::new(
            config.clone(),
            store,
            clock,
            device.components.agent.clone(),
        ));
        let (events, _) = broadcast::channel(100);

        Ok(Self {
            config,
            backend,
            limiter,
            sessions,
            csrf,
            events,
        })
    }

    /// Subscribe to auth lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Attempt a password sign-in.
    ///
    /// The limiter is consulted first; a denial never reaches the
    /// backend. A backend rejection is recorded as a failed attempt; a
    /// backend outage is an error and proves nothing about the
    /// credentials, so no attempt is recorded for it.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        ctx: &RequestContext,
    ) -> AuthResult<SignInOutcome> {
        let decision = self.limiter.is_allowed(Operation::SignIn, ctx);
        if !decision.allowed {
            info!(
                locked = decision.account_locked,
                "sign-in refused by rate limiter"
            );
            return Ok(SignInOutcome::RateLimited {
                retry_delay: decision.retry_delay,
                block_expires: decision.block_expires,
                account_locked: decision.account_locked,
            });
        }

        let user = match self.backend.verify_credentials(email, password).await {
            Ok(user) => user,
            Err(BackendError::InvalidCredentials) => {
                self.limiter.record_attempt(Operation::SignIn, false, ctx);
                let after = self.limiter.is_allowed(Operation::SignIn, ctx);
                return Ok(SignInOutcome::InvalidCredentials {
                    remaining_attempts: after.remaining_attempts,
                });
            }
            Err(BackendError::Unavailable(reason)) => {
                return Err(AuthError::Backend(reason));
            }
        };
        self.limiter.record_attempt(Operation::SignIn, true, ctx);

        let backend_session = match self.backend.current_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return Err(AuthError::Backend(
                    "no backend session after sign-in".to_string(),
                ))
            }
            Err(err) => return Err(AuthError::Backend(err.to_string())),
        };

        let role = user.role.clone().unwrap_or_else(|| "member".to_string());
        let session = self
            .sessions
            .create_session(&user, &backend_session, role.clone(), grants_for(&role))?;
        info!(user = %user.id, "sign-in complete");
        let _ = self.events.send(AuthEvent::SignedIn {
            user_id: user.id.clone(),
            session_id: session.session_id.clone(),
        });
        Ok(SignInOutcome::Success { session })
    }

    /// Sign out of a session.
    ///
    /// Local state goes first so the session is dead even if the
    /// backend call fails; the backend sign-out is best effort.
    pub async fn sign_out(&self, session_id: &str) -> AuthResult<()> {
        self.sessions
            .invalidate_session(session_id, SessionEventKind::Logout)?;
        if let Err(err) = self.backend.sign_out().await {
            warn!(error = %err, "backend sign-out failed, local session already cleared");
        }
        let _ = self.events.send(AuthEvent::SignedOut {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Extend a session and notify subscribers.
    pub fn refresh_session(&self, session_id: &str) -> AuthResult<SecureSessionData> {
        let session = self.sessions.refresh_session(session_id)?;
        let _ = self.events.send(AuthEvent::TokenRefreshed {
            session_id: session_id.to_string(),
        });
        Ok(session)
    }

    /// Restore the persisted current session on startup.
    ///
    /// Runs full validation; anything expired, tampered, or drifted is
    /// dropped and `None` comes back.
    pub fn restore_session(&self) -> Option<SecureSessionData> {
        let session_id = self.sessions.current_session_id()?;
        let check = self.sessions.validate_session(&session_id);
        if !check.is_valid {
            debug!(reason = ?check.error, "persisted session rejected at restore");
            return None;
        }
        self.sessions.get_session(&session_id)
    }

    /// Validate the current session, or `None` when signed out.
    pub fn validate_current(&self) -> Option<SessionValidation> {
        let session_id = self.sessions.current_session_id()?;
        Some(self.sessions.validate_session(&session_id))
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    /// Start the owned cleanup sweeps.
    pub fn start_background_tasks(&self) {
        self.sessions.start_sweep();
        self.csrf.start_sweep();
    }

    /// Stop every owned background task. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.sessions.destroy();
        self.csrf.destroy();
    }
}

/// Baseline grants per role. Page-level code can extend these on the
/// session it gets back.
fn grants_for(role: &str) -> Vec<String> {
    let mut grants = vec!["read".to_string(), "write".to_string()];
    if role == "admin" {
        grants.push("manage".to_string());
    }
    grants
}
