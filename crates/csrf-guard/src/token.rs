use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single-use anti-forgery token tied to a purpose and origin.
///
/// Optional bindings (nonce, agent, session) tighten the token to the
/// context it was issued in; every binding present on the token must be
/// matched at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub id: String,
    pub purpose: String,
    pub origin: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_session: Option<String>,
}

impl CsrfToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A submission token scoped to one form. Longer-lived than generic
/// tokens since users can sit on a form for a while before submitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormToken {
    pub id: String,
    pub form_id: String,
    pub origin: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FormToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Extra bindings requested at issuance.
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    /// Attach a random nonce that must be echoed back at validation.
    pub with_nonce: bool,
    /// Bind the token to a user agent string.
    pub bind_agent: Option<String>,
    /// Bind the token to a session id.
    pub bind_session: Option<String>,
}

/// Context observed at validation time, matched against whatever
/// bindings the token carries.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub nonce: Option<String>,
    pub agent: Option<String>,
    pub session: Option<String>,
}

/// Outcome of a token validation. Invalid checks carry the first
/// failure reason encountered.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl TokenCheck {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_token(now: DateTime<Utc>) -> CsrfToken {
        CsrfToken {
            id: "tok-1".to_string(),
            purpose: "form_submit".to_string(),
            origin: "https://app.driftline.dev".to_string(),
            issued_at: now,
            expires_at: now + Duration::minutes(30),
            nonce: None,
            bound_agent: None,
            bound_session: None,
        }
    }

    #[test]
    fn token_expiry_is_inclusive_at_the_boundary() {
        let now = Utc::now();
        let token = sample_token(now);

        assert!(!token.is_expired(now));
        assert!(!token.is_expired(now + Duration::minutes(29)));
        assert!(token.is_expired(now + Duration::minutes(30)));
        assert!(token.is_expired(now + Duration::hours(2)));
    }

    #[test]
    fn absent_bindings_are_omitted_from_json() {
        let token = sample_token(Utc::now());
        let json = serde_json::to_string(&token).unwrap();

        assert!(!json.contains("nonce"));
        assert!(!json.contains("bound_agent"));
        assert!(!json.contains("bound_session"));
    }

    #[test]
    fn token_survives_a_serde_roundtrip_with_bindings() {
        let mut token = sample_token(Utc::now());
        token.nonce = Some("n-1".to_string());
        token.bound_session = Some("sess-1".to_string());

        let json = serde_json::to_string(&token).unwrap();
        let back: CsrfToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn check_constructors_carry_the_reason() {
        assert_eq!(TokenCheck::ok().reason, None);
        let check = TokenCheck::fail("Token expired");
        assert!(!check.valid);
        assert_eq!(check.reason.as_deref(), Some("Token expired"));
    }
}
