//! Session data types.

use chrono::{DateTime, Utc};
use device_fingerprint::{DeviceFingerprint, EnvironmentSnapshot};
use serde::{Deserialize, Serialize};

/// Random bytes in a session id (hex-encoded to twice this length).
pub const SESSION_ID_BYTES: usize = 32;

/// The user shape produced by the credential backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUser {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The opaque session shape produced by the credential backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSession {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: BackendUser,
}

/// What happened to a session, recorded in its event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Login,
    Refresh,
    FingerprintMismatch,
    Expired,
    Logout,
    ConcurrentLimit,
    TamperDetected,
}

impl SessionEventKind {
    /// The severity an event of this kind is recorded at.
    pub fn severity(&self) -> EventSeverity {
        match self {
            SessionEventKind::Login
            | SessionEventKind::Refresh
            | SessionEventKind::Logout => EventSeverity::Low,
            SessionEventKind::Expired | SessionEventKind::ConcurrentLimit => EventSeverity::Medium,
            SessionEventKind::FingerprintMismatch | SessionEventKind::TamperDetected => {
                EventSeverity::High
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
}

/// One entry in a session's ordered event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SessionEventKind,
    pub severity: EventSeverity,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SecurityEvent {
    pub fn new(kind: SessionEventKind, at: DateTime<Utc>, detail: Option<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            at,
            detail,
        }
    }
}

/// A session as persisted in the secure store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureSessionData {
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Fingerprint captured at creation; drift against the live
    /// environment is checked on every validation.
    pub fingerprint: DeviceFingerprint,
    pub security_events: Vec<SecurityEvent>,
    pub is_active: bool,
    /// Backend access token carried for restore flows. Never surfaced
    /// through descriptors.
    pub access_token: String,
}

impl SecureSessionData {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What other devices see when listing a user's sessions. Carries no
/// fingerprint and no tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub device_kind: String,
    pub agent_summary: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_current_session: bool,
}

/// Rough device class from probe data.
pub fn device_kind(snapshot: &EnvironmentSnapshot) -> &'static str {
    if snapshot.touch_support {
        "mobile"
    } else {
        "desktop"
    }
}

/// First token of the agent string, enough to tell clients apart in a
/// session list without shipping the whole fingerprint.
pub fn agent_summary(agent: &str) -> String {
    agent
        .split_whitespace()
        .next()
        .unwrap_or("unknown")
        .to_string()
}
