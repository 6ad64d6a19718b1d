//! Self-contained OAuth state blobs.
//!
//! The state parameter carried through an OAuth round trip is a base64
//! JSON blob referencing a nonce-bound token held by the guard. The
//! blob itself is not signed; integrity comes from the token lookup,
//! which is why the redirect target is re-checked against the allow
//! list after the round trip.

use crate::guard::CsrfGuard;
use crate::token::{IssueOptions, ValidateOptions};
use crate::{GuardError, GuardResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

const OAUTH_STATE_PURPOSE: &str = "oauth_state";

#[derive(Debug, Serialize, Deserialize)]
struct OAuthStateBlob {
    token_id: String,
    nonce: String,
    issued_at: DateTime<Utc>,
    redirect_to: String,
    origin: String,
}

/// Outcome of validating a returned OAuth state parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthStateCheck {
    pub valid: bool,
    /// Post-login redirect target, present only on success.
    pub redirect_to: Option<String>,
    pub reason: Option<String>,
}

impl OAuthStateCheck {
    fn ok(redirect_to: impl Into<String>) -> Self {
        Self {
            valid: true,
            redirect_to: Some(redirect_to.into()),
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            redirect_to: None,
            reason: Some(reason.into()),
        }
    }
}

/// Whether a post-login redirect target is acceptable.
///
/// Allowed: same-origin relative paths (but not scheme-relative `//`
/// forms), the app origin itself and its subdomains, and localhost for
/// development. Everything else is an open-redirect vector.
pub fn redirect_allowed(redirect_to: &str, app_origin: &Url) -> bool {
    if redirect_to.is_empty() {
        return false;
    }
    if let Some(rest) = redirect_to.strip_prefix('/') {
        // "//host" and "/\host" are scheme-relative escapes.
        return !rest.starts_with('/') && !rest.starts_with('\\');
    }
    let Ok(url) = Url::parse(redirect_to) else {
        return false;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" || host == "127.0.0.1" {
        return true;
    }
    match app_origin.host_str() {
        Some(app_host) => host == app_host || host.ends_with(&format!(".{app_host}")),
        None => false,
    }
}

impl CsrfGuard {
    /// Issue an OAuth state blob for a redirect target.
    ///
    /// Refuses targets outside the allow list. The embedded token is
    /// nonce-bound and bound to this client's user agent, and expires
    /// with the state's maximum age.
    pub fn issue_oauth_state(&self, redirect_to: &str) -> GuardResult<String> {
        let inner = self.inner();
        let app_origin = Url::parse(&inner.config.app_origin)
            .map_err(|err| GuardError::Validation(format!("App origin unparseable: {err}")))?;
        if !redirect_allowed(redirect_to, &app_origin) {
            warn!(redirect_to, "refused oauth state for disallowed redirect");
            return Err(GuardError::Validation(format!(
                "Redirect target not allowed: {redirect_to}"
            )));
        }

        let token = self.issue(
            OAUTH_STATE_PURPOSE,
            Some(inner.config.oauth_state_max_age()),
            IssueOptions {
                with_nonce: true,
                bind_agent: Some(inner.agent.clone()),
                bind_session: None,
            },
        );
        let blob = OAuthStateBlob {
            token_id: token.id,
            nonce: token.nonce.unwrap_or_default(),
            issued_at: token.issued_at,
            redirect_to: redirect_to.to_string(),
            origin: inner.config.app_origin.clone(),
        };
        let state = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&blob)?);
        debug!(redirect_to, "issued oauth state");
        Ok(state)
    }

    /// Validate a state parameter returned from an OAuth round trip.
    ///
    /// Decodes the blob, checks origin and age, re-checks the redirect
    /// target against the allow list, then consumes the embedded token
    /// with its nonce and agent bindings. States are single use.
    pub fn validate_oauth_state(&self, state: &str) -> OAuthStateCheck {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(state) else {
            warn!("oauth state is not valid base64");
            return OAuthStateCheck::fail("State malformed");
        };
        let Ok(blob) = serde_json::from_slice::<OAuthStateBlob>(&bytes) else {
            warn!("oauth state does not decode to a state blob");
            return OAuthStateCheck::fail("State malformed");
        };
        if blob.token_id.is_empty() || blob.nonce.is_empty() {
            warn!("oauth state is missing required fields");
            return OAuthStateCheck::fail("State missing fields");
        }

        let inner = self.inner();
        if blob.origin != inner.config.app_origin {
            warn!(origin = %blob.origin, "oauth state origin mismatch");
            return OAuthStateCheck::fail("Origin mismatch");
        }

        let age = inner.clock.now() - blob.issued_at;
        if age > inner.config.oauth_state_max_age() {
            info!(age_ms = age.num_milliseconds(), "oauth state expired");
            return OAuthStateCheck::fail("State expired");
        }

        // The blob is attacker-writable, so the redirect target inside
        // it gets the same scrutiny as at issuance.
        let allowed = Url::parse(&inner.config.app_origin)
            .map(|app_origin| redirect_allowed(&blob.redirect_to, &app_origin))
            .unwrap_or(false);
        if !allowed {
            warn!(redirect_to = %blob.redirect_to, "oauth state redirect not allowed");
            return OAuthStateCheck::fail("Redirect not allowed");
        }

        let check = self.consume(
            &blob.token_id,
            OAUTH_STATE_PURPOSE,
            Some(&blob.origin),
            &ValidateOptions {
                nonce: Some(blob.nonce),
                agent: Some(inner.agent.clone()),
                session: None,
            },
        );
        if !check.valid {
            return OAuthStateCheck {
                valid: false,
                redirect_to: None,
                reason: check.reason,
            };
        }
        debug!(redirect_to = %blob.redirect_to, "oauth state validated");
        OAuthStateCheck::ok(blob.redirect_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client_config_and_utils::{Clock, ManualClock, SecurityConfig};
    use client_storage::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn app_origin() -> Url {
        Url::parse("https://app.driftline.dev").unwrap()
    }

    fn guard_for(agent: &str, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> CsrfGuard {
        CsrfGuard::new(Arc::new(SecurityConfig::default()), store, clock, agent)
    }

    fn fresh_guard() -> (CsrfGuard, ManualClock) {
        let clock = ManualClock::starting_now();
        let guard = guard_for(
            "test-agent",
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
        );
        (guard, clock)
    }

    fn tamper(state: &str, mutate: impl FnOnce(&mut serde_json::Value)) -> String {
        let bytes = URL_SAFE_NO_PAD.decode(state).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        mutate(&mut value);
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
    }

    // ===== redirect allow list =====

    #[test]
    fn test_relative_paths_allowed() {
        assert!(redirect_allowed("/dashboard", &app_origin()));
        assert!(redirect_allowed("/", &app_origin()));
        assert!(redirect_allowed("/settings?tab=security", &app_origin()));
    }

    #[test]
    fn test_scheme_relative_escapes_rejected() {
        assert!(!redirect_allowed("//evil.example.com/phish", &app_origin()));
        assert!(!redirect_allowed("/\\evil.example.com", &app_origin()));
    }

    #[test]
    fn test_app_origin_and_subdomains_allowed() {
        assert!(redirect_allowed("https://app.driftline.dev/home", &app_origin()));
        assert!(redirect_allowed("https://staging.app.driftline.dev", &app_origin()));
        assert!(!redirect_allowed("https://evil.example.com", &app_origin()));
        // Suffix tricks must not pass the subdomain check.
        assert!(!redirect_allowed(
            "https://app.driftline.dev.evil.example.com",
            &app_origin()
        ));
    }

    #[test]
    fn test_localhost_allowed_for_development() {
        assert!(redirect_allowed("http://localhost:3000/cb", &app_origin()));
        assert!(redirect_allowed("http://127.0.0.1:8080", &app_origin()));
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        assert!(!redirect_allowed("javascript:alert(1)", &app_origin()));
        assert!(!redirect_allowed("ftp://app.driftline.dev/file", &app_origin()));
        assert!(!redirect_allowed("", &app_origin()));
        assert!(!redirect_allowed("not a url", &app_origin()));
    }

    // ===== issue and validate =====

    #[test]
    fn test_state_roundtrip_returns_redirect() {
        let (guard, _clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();

        let check = guard.validate_oauth_state(&state);
        assert!(check.valid);
        assert_eq!(check.redirect_to.as_deref(), Some("/dashboard"));
        assert_eq!(check.reason, None);
    }

    #[test]
    fn test_state_is_single_use() {
        let (guard, _clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();

        assert!(guard.validate_oauth_state(&state).valid);
        let replay = guard.validate_oauth_state(&state);
        assert!(!replay.valid);
        assert_eq!(replay.reason.as_deref(), Some("Token not found"));
    }

    #[test]
    fn test_disallowed_redirect_refused_at_issue() {
        let (guard, _clock) = fresh_guard();
        let err = guard
            .issue_oauth_state("https://evil.example.com")
            .unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
        // Nothing was issued.
        assert_eq!(guard.token_count(), 0);
    }

    #[test]
    fn test_stale_state_rejected() {
        let (guard, clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();

        clock.advance(chrono::Duration::minutes(31));
        let check = guard.validate_oauth_state(&state);
        assert!(!check.valid);
        assert_eq!(check.reason.as_deref(), Some("State expired"));
    }

    #[test]
    fn test_garbage_state_malformed() {
        let (guard, _clock) = fresh_guard();
        assert_eq!(
            guard.validate_oauth_state("%%%not-base64%%%").reason.as_deref(),
            Some("State malformed")
        );
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert_eq!(
            guard.validate_oauth_state(&not_json).reason.as_deref(),
            Some("State malformed")
        );
    }

    // ===== tampering =====

    #[test]
    fn test_blanked_token_id_rejected() {
        let (guard, _clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();
        let tampered = tamper(&state, |v| v["token_id"] = "".into());

        let check = guard.validate_oauth_state(&tampered);
        assert_eq!(check.reason.as_deref(), Some("State missing fields"));
    }

    #[test]
    fn test_foreign_origin_rejected() {
        let (guard, _clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();
        let tampered = tamper(&state, |v| {
            v["origin"] = "https://evil.example.com".into();
        });

        let check = guard.validate_oauth_state(&tampered);
        assert_eq!(check.reason.as_deref(), Some("Origin mismatch"));
    }

    #[test]
    fn test_tampered_redirect_caught_by_recheck() {
        // The blob is unsigned, so swapping the redirect leaves the
        // embedded token fully valid. The allow-list recheck is what
        // stops the open redirect.
        let (guard, _clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();
        let tampered = tamper(&state, |v| {
            v["redirect_to"] = "https://evil.example.com/phish".into();
        });

        let check = guard.validate_oauth_state(&tampered);
        assert!(!check.valid);
        assert_eq!(check.reason.as_deref(), Some("Redirect not allowed"));
    }

    #[test]
    fn test_swapped_nonce_rejected() {
        let (guard, _clock) = fresh_guard();
        let state = guard.issue_oauth_state("/dashboard").unwrap();
        let tampered = tamper(&state, |v| v["nonce"] = "forged-nonce".into());

        let check = guard.validate_oauth_state(&tampered);
        assert_eq!(check.reason.as_deref(), Some("Nonce mismatch"));
    }

    #[test]
    fn test_state_bound_to_issuing_agent() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();

        let issuer = guard_for("agent-a", Arc::clone(&store), Arc::new(clock.clone()));
        let state = issuer.issue_oauth_state("/dashboard").unwrap();
        drop(issuer);

        // A different client restores the mirrored token but presents
        // its own agent string.
        let other = guard_for("agent-b", store, Arc::new(clock.clone()));
        let check = other.validate_oauth_state(&state);
        assert!(!check.valid);
        assert_eq!(check.reason.as_deref(), Some("Agent mismatch"));
    }
}
