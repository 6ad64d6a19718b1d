use client_config_and_utils::ConfigIssue;
use session_guard::SessionError;
use thiserror::Error;

/// Errors surfaced by the orchestrator.
///
/// Expected negatives (wrong password, rate-limit denial) are not
/// errors; they come back as [`crate::SignInOutcome`] variants. These
/// are the genuinely exceptional paths.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Construction was refused because the configuration is unsound.
    #[error("Invalid configuration: {}", join_issues(.0))]
    InvalidConfig(Vec<ConfigIssue>),
    /// The credential backend could not complete a call.
    #[error("Backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type AuthResult<T> = Result<T, AuthError>;

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
