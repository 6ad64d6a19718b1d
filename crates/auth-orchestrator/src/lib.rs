//! Authentication orchestration over the client security stack.
//!
//! This crate provides:
//! - The [`AuthBackend`] trait abstracting the credential backend
//! - [`AuthOrchestrator`], the composition root wiring the rate
//!   limiter, session manager, anti-forgery guard, and secure storage
//!   over injected dependencies
//! - Auth lifecycle events fanned out over a broadcast channel

mod backend;
mod error;
mod orchestrator;

pub use backend::{AuthBackend, BackendError};
pub use error::{AuthError, AuthResult};
pub use orchestrator::{AuthEvent, AuthOrchestrator, SignInOutcome};
pub use session_guard::{BackendSession, BackendUser, SecureSessionData, SessionValidation};
