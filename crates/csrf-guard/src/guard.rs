//! Token issuance, validation, and consumption.

use crate::token::{CsrfToken, FormToken, IssueOptions, TokenCheck, ValidateOptions};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use client_config_and_utils::{Clock, SecurityConfig};
use client_storage::{KeyValueStore, StorageKeys};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cap on live generic tokens. Oldest are evicted past this.
pub const MAX_GENERIC_TOKENS: usize = 10;

/// Cap on live form tokens.
pub const MAX_FORM_TOKENS: usize = 20;

pub(crate) struct GuardInner {
    pub(crate) config: Arc<SecurityConfig>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) agent: String,
    store: Arc<dyn KeyValueStore>,
    tokens: Mutex<HashMap<String, CsrfToken>>,
    form_tokens: Mutex<HashMap<String, FormToken>>,
}

/// Anti-forgery token manager.
///
/// Tokens are held in memory and mirrored to the backing store on every
/// mutation so a restarted client resumes with its unexpired tokens. The
/// mirror is best-effort: store failures are logged and the in-memory
/// state stays authoritative.
pub struct CsrfGuard {
    inner: Arc<GuardInner>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl CsrfGuard {
    /// Create a guard, restoring any unexpired mirrored tokens.
    ///
    /// `agent` is the user agent string of this client; OAuth state
    /// tokens are bound to it at issuance and checked at validation.
    pub fn new(
        config: Arc<SecurityConfig>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        agent: impl Into<String>,
    ) -> Self {
        let inner = Arc::new(GuardInner {
            config,
            clock,
            agent: agent.into(),
            store,
            tokens: Mutex::new(HashMap::new()),
            form_tokens: Mutex::new(HashMap::new()),
        });
        inner.restore();
        Self {
            inner,
            sweep: Mutex::new(None),
        }
    }

    pub(crate) fn inner(&self) -> &GuardInner {
        &self.inner
    }

    /// Issue a generic anti-forgery token.
    ///
    /// `ttl` overrides the configured lifetime. Bindings requested in
    /// `opts` are attached to the token and become mandatory checks at
    /// validation time.
    pub fn issue(&self, purpose: &str, ttl: Option<Duration>, opts: IssueOptions) -> CsrfToken {
        let now = self.inner.clock.now();
        let token = CsrfToken {
            id: Uuid::new_v4().to_string(),
            purpose: purpose.to_string(),
            origin: self.inner.config.app_origin.clone(),
            issued_at: now,
            expires_at: now + ttl.unwrap_or_else(|| self.inner.config.csrf_token_ttl()),
            nonce: opts.with_nonce.then(generate_nonce),
            bound_agent: opts.bind_agent,
            bound_session: opts.bind_session,
        };

        let mut tokens = self.inner.tokens.lock().unwrap();
        tokens.insert(token.id.clone(), token.clone());
        while tokens.len() > MAX_GENERIC_TOKENS {
            let oldest = tokens
                .values()
                .min_by_key(|t| t.issued_at)
                .map(|t| t.id.clone());
            match oldest {
                Some(id) => {
                    tokens.remove(&id);
                    debug!(token_id = %id, "evicted oldest token over cap");
                }
                None => break,
            }
        }
        self.inner.mirror_generic(&tokens);
        debug!(token_id = %token.id, purpose, "issued csrf token");
        token
    }

    /// Validate a token without consuming it.
    ///
    /// Checks run in order: existence, expiry, purpose, origin (when
    /// given), then every binding the token carries. The first failure
    /// wins. Expired tokens are purged on the spot.
    pub fn validate(
        &self,
        token_id: &str,
        purpose: &str,
        origin: Option<&str>,
        opts: &ValidateOptions,
    ) -> TokenCheck {
        let mut tokens = self.inner.tokens.lock().unwrap();
        let Some(token) = tokens.get(token_id) else {
            warn!(token_id, "csrf token not found");
            return TokenCheck::fail("Token not found");
        };
        let check = self.inner.check_generic(token, purpose, origin, opts);
        if check.reason.as_deref() == Some("Token expired") {
            tokens.remove(token_id);
            self.inner.mirror_generic(&tokens);
        }
        check
    }

    /// Validate and, on success, delete the token. Tokens are single
    /// use: a second consume of the same id reports `Token not found`.
    pub fn consume(
        &self,
        token_id: &str,
        purpose: &str,
        origin: Option<&str>,
        opts: &ValidateOptions,
    ) -> TokenCheck {
        let mut tokens = self.inner.tokens.lock().unwrap();
        let Some(token) = tokens.get(token_id) else {
            warn!(token_id, "csrf token not found");
            return TokenCheck::fail("Token not found");
        };
        let check = self.inner.check_generic(token, purpose, origin, opts);
        if check.valid || check.reason.as_deref() == Some("Token expired") {
            tokens.remove(token_id);
            self.inner.mirror_generic(&tokens);
        }
        if check.valid {
            debug!(token_id, purpose, "consumed csrf token");
        }
        check
    }

    /// Issue a submission token scoped to one form.
    pub fn issue_form_token(&self, form_id: &str, ttl: Option<Duration>) -> FormToken {
        let now = self.inner.clock.now();
        let token = FormToken {
            id: Uuid::new_v4().to_string(),
            form_id: form_id.to_string(),
            origin: self.inner.config.app_origin.clone(),
            issued_at: now,
            expires_at: now + ttl.unwrap_or_else(|| self.inner.config.form_token_ttl()),
        };

        let mut form_tokens = self.inner.form_tokens.lock().unwrap();
        form_tokens.insert(token.id.clone(), token.clone());
        while form_tokens.len() > MAX_FORM_TOKENS {
            let oldest = form_tokens
                .values()
                .min_by_key(|t| t.issued_at)
                .map(|t| t.id.clone());
            match oldest {
                Some(id) => {
                    form_tokens.remove(&id);
                    debug!(token_id = %id, "evicted oldest form token over cap");
                }
                None => break,
            }
        }
        self.inner.mirror_form(&form_tokens);
        debug!(token_id = %token.id, form_id, "issued form token");
        token
    }

    /// Validate a form token without consuming it.
    pub fn validate_form_token(&self, token_id: &str, form_id: &str) -> TokenCheck {
        let mut form_tokens = self.inner.form_tokens.lock().unwrap();
        let Some(token) = form_tokens.get(token_id) else {
            warn!(token_id, "form token not found");
            return TokenCheck::fail("Token not found");
        };
        let check = self.inner.check_form(token, form_id);
        if check.reason.as_deref() == Some("Token expired") {
            form_tokens.remove(token_id);
            self.inner.mirror_form(&form_tokens);
        }
        check
    }

    /// Validate and, on success, delete a form token.
    pub fn consume_form_token(&self, token_id: &str, form_id: &str) -> TokenCheck {
        let mut form_tokens = self.inner.form_tokens.lock().unwrap();
        let Some(token) = form_tokens.get(token_id) else {
            warn!(token_id, "form token not found");
            return TokenCheck::fail("Token not found");
        };
        let check = self.inner.check_form(token, form_id);
        if check.valid || check.reason.as_deref() == Some("Token expired") {
            form_tokens.remove(token_id);
            self.inner.mirror_form(&form_tokens);
        }
        if check.valid {
            debug!(token_id, form_id, "consumed form token");
        }
        check
    }

    /// Drop every expired token from both pools. Returns how many were
    /// removed. The background sweep calls this on its interval.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of live generic tokens.
    pub fn token_count(&self) -> usize {
        self.inner.tokens.lock().unwrap().len()
    }

    /// Number of live form tokens.
    pub fn form_token_count(&self) -> usize {
        self.inner.form_tokens.lock().unwrap().len()
    }

    /// Start the periodic expired-token sweep. No-op if already running.
    pub fn start_sweep(&self) {
        let mut slot = self.sweep.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let period =
            std::time::Duration::from_millis(self.inner.config.token_sweep_interval_ms.max(1));
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = inner.purge_expired();
                if removed > 0 {
                    debug!(removed, "token sweep purged expired entries");
                }
            }
        }));
    }

    /// Stop the sweep. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweep.lock().unwrap().take() {
            handle.abort();
            debug!("token sweep stopped");
        }
    }
}

impl Drop for CsrfGuard {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl GuardInner {
    fn check_generic(
        &self,
        token: &CsrfToken,
        purpose: &str,
        origin: Option<&str>,
        opts: &ValidateOptions,
    ) -> TokenCheck {
        let now = self.clock.now();
        if token.is_expired(now) {
            info!(token_id = %token.id, "csrf token expired");
            return TokenCheck::fail("Token expired");
        }
        if token.purpose != purpose {
            warn!(token_id = %token.id, expected = %token.purpose, got = purpose, "csrf purpose mismatch");
            return TokenCheck::fail("Purpose mismatch");
        }
        if let Some(origin) = origin {
            if token.origin != origin {
                warn!(token_id = %token.id, "csrf origin mismatch");
                return TokenCheck::fail("Origin mismatch");
            }
        }
        if let Some(nonce) = &token.nonce {
            if opts.nonce.as_deref() != Some(nonce.as_str()) {
                warn!(token_id = %token.id, "csrf nonce mismatch");
                return TokenCheck::fail("Nonce mismatch");
            }
        }
        if let Some(agent) = &token.bound_agent {
            if opts.agent.as_deref() != Some(agent.as_str()) {
                warn!(token_id = %token.id, "csrf agent mismatch");
                return TokenCheck::fail("Agent mismatch");
            }
        }
        if let Some(session) = &token.bound_session {
            if opts.session.as_deref() != Some(session.as_str()) {
                warn!(token_id = %token.id, "csrf session mismatch");
                return TokenCheck::fail("Session mismatch");
            }
        }
        TokenCheck::ok()
    }

    fn check_form(&self, token: &FormToken, form_id: &str) -> TokenCheck {
        let now = self.clock.now();
        if token.is_expired(now) {
            info!(token_id = %token.id, "form token expired");
            return TokenCheck::fail("Token expired");
        }
        if token.form_id != form_id {
            warn!(token_id = %token.id, expected = %token.form_id, got = form_id, "form id mismatch");
            return TokenCheck::fail("Form mismatch");
        }
        TokenCheck::ok()
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        {
            let mut tokens = self.tokens.lock().unwrap();
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired(now));
            if tokens.len() < before {
                removed += before - tokens.len();
                self.mirror_generic(&tokens);
            }
        }
        {
            let mut form_tokens = self.form_tokens.lock().unwrap();
            let before = form_tokens.len();
            form_tokens.retain(|_, token| !token.is_expired(now));
            if form_tokens.len() < before {
                removed += before - form_tokens.len();
                self.mirror_form(&form_tokens);
            }
        }
        removed
    }

    fn restore(&self) {
        let now = self.clock.now();
        match self.store.get(StorageKeys::CSRF_TOKENS) {
            Ok(Some(json)) => match serde_json::from_str::<Vec<CsrfToken>>(&json) {
                Ok(list) => {
                    let mut tokens = self.tokens.lock().unwrap();
                    for token in list {
                        if !token.is_expired(now) {
                            tokens.insert(token.id.clone(), token);
                        }
                    }
                    debug!(restored = tokens.len(), "restored csrf tokens");
                }
                Err(err) => warn!(error = %err, "discarding unreadable csrf token mirror"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not read csrf token mirror"),
        }
        match self.store.get(StorageKeys::FORM_TOKENS) {
            Ok(Some(json)) => match serde_json::from_str::<Vec<FormToken>>(&json) {
                Ok(list) => {
                    let mut form_tokens = self.form_tokens.lock().unwrap();
                    for token in list {
                        if !token.is_expired(now) {
                            form_tokens.insert(token.id.clone(), token);
                        }
                    }
                    debug!(restored = form_tokens.len(), "restored form tokens");
                }
                Err(err) => warn!(error = %err, "discarding unreadable form token mirror"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not read form token mirror"),
        }
    }

    fn mirror_generic(&self, tokens: &HashMap<String, CsrfToken>) {
        let list: Vec<&CsrfToken> = tokens.values().collect();
        match serde_json::to_string(&list) {
            Ok(json) => {
                if let Err(err) = self.store.set(StorageKeys::CSRF_TOKENS, &json) {
                    warn!(error = %err, "failed to mirror csrf tokens");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize csrf tokens"),
        }
    }

    fn mirror_form(&self, form_tokens: &HashMap<String, FormToken>) {
        let list: Vec<&FormToken> = form_tokens.values().collect();
        match serde_json::to_string(&list) {
            Ok(json) => {
                if let Err(err) = self.store.set(StorageKeys::FORM_TOKENS, &json) {
                    warn!(error = %err, "failed to mirror form tokens");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize form tokens"),
        }
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
