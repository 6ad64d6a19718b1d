//! Core types, configuration, and utilities for the Driftline client
//! security stack.

mod clock;
mod config;
mod error;
mod logging;
mod paths;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigIssue, SecurityConfig, DEFAULT_APP_ORIGIN, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
