//! The credential backend seam.

use async_trait::async_trait;
use session_guard::{BackendSession, BackendUser};
use thiserror::Error;

/// Errors a credential backend can report.
///
/// `InvalidCredentials` is the expected negative and counts as a
/// failed attempt. `Unavailable` means nothing was proven about the
/// credentials and must not count against the caller.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// The credential backend the orchestrator consumes.
///
/// The wire protocol behind it is out of scope here; production
/// implementations wrap an HTTP client, tests script one.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Check credentials, returning the account on success.
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<BackendUser, BackendError>;

    /// The backend's current session, if one is established.
    async fn current_session(&self) -> Result<Option<BackendSession>, BackendError>;

    /// Terminate the backend session.
    async fn sign_out(&self) -> Result<(), BackendError>;
}
