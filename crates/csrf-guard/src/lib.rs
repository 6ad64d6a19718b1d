//! Anti-forgery tokens for state-changing requests.
//!
//! Issues single-use CSRF tokens, per-form submission tokens, and
//! self-contained OAuth state blobs. Tokens live in memory and are
//! mirrored to a session-scoped key-value store so a reloaded client
//! can pick up where it left off. All validation failures resolve to a
//! [`TokenCheck`] with a reason string rather than an error; errors are
//! reserved for refusing to issue (disallowed redirect targets).

mod guard;
mod oauth_state;
mod token;

use thiserror::Error;

pub use guard::{CsrfGuard, MAX_FORM_TOKENS, MAX_GENERIC_TOKENS};
pub use oauth_state::{redirect_allowed, OAuthStateCheck};
pub use token::{CsrfToken, FormToken, IssueOptions, TokenCheck, ValidateOptions};

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GuardResult<T> = std::result::Result<T, GuardError>;
