//! Attempt tracking, progressive delays, and account lockout.
//!
//! Counts failed attempts per (operation, identifier) pair inside a
//! counting window, blocks the pair once the allowance is spent, and
//! escalates to an account-wide lockout when cumulative failures for a
//! user cross a separate higher threshold. Delays are advisory: the
//! caller decides whether to wait.
//!
//! This is a client-side layer. The backend remains the real
//! enforcement boundary, which drives the failure policy: if the
//! backing store errors, the limiter fails OPEN and allows the request
//! instead of locking users out on infrastructure trouble. The inverse
//! asymmetry (session validation fails closed) lives in session-guard.

mod limiter;
mod operation;
mod records;

pub use limiter::{Decision, LimiterMetrics, LimiterStatus, RateLimiter, RequestContext};
pub use operation::{Operation, OperationPolicy, PolicySet};
pub use records::{AttemptRecord, FailureCount, LockoutRecord};
