//! Session lifecycle with device binding.
//!
//! Sessions are created from a verified backend sign-in, sealed into
//! the secure store, bound to the device fingerprint captured at
//! creation, and indexed per user for concurrency tracking. Validation
//! walks existence, expiry, fingerprint drift, and the refresh window
//! in that order and grades the risk of what it finds.
//!
//! The failure policy is the inverse of the rate limiter's: anything
//! unreadable or tampered during validation counts as "session not
//! found" and blocks. A client that cannot prove its session is treated
//! as having none.

mod manager;
mod session;

use thiserror::Error;

pub use manager::{
    SecurityRisk, SessionAction, SessionManager, SessionValidation,
};
pub use session::{
    agent_summary, device_kind, BackendSession, BackendUser, EventSeverity, SecureSessionData,
    SecurityEvent, SessionDescriptor, SessionEventKind, SESSION_ID_BYTES,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] client_storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
