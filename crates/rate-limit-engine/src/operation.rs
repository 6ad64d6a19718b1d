//! Rate-limited operations and their policies.

use chrono::Duration;
use client_config_and_utils::SecurityConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Operations tracked by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SignIn,
    SignUp,
    PasswordReset,
    OtpVerify,
    TokenRefresh,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::SignIn,
        Operation::SignUp,
        Operation::PasswordReset,
        Operation::OtpVerify,
        Operation::TokenRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SignIn => "sign_in",
            Operation::SignUp => "sign_up",
            Operation::PasswordReset => "password_reset",
            Operation::OtpVerify => "otp_verify",
            Operation::TokenRefresh => "token_refresh",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPolicy {
    /// Failed attempts allowed inside the window.
    pub max_attempts: u32,
    /// Window over which attempts are counted.
    pub window: Duration,
    /// How long the pair stays blocked once the allowance is spent.
    pub block_duration: Duration,
    /// Whether a successful attempt clears the counter.
    pub skip_successful_attempts: bool,
}

/// Per-operation policies over a config-derived default.
///
/// Password resets and OTP checks get tighter built-in limits than the
/// generic default; both are favorite brute-force targets. Token
/// refresh is more lenient since clients refresh on a timer.
#[derive(Debug, Clone)]
pub struct PolicySet {
    default: OperationPolicy,
    overrides: HashMap<Operation, OperationPolicy>,
}

impl PolicySet {
    pub fn from_config(config: &SecurityConfig) -> Self {
        let default = OperationPolicy {
            max_attempts: config.max_attempts,
            window: config.attempt_window(),
            block_duration: config.block_duration(),
            skip_successful_attempts: true,
        };
        let mut overrides = HashMap::new();
        overrides.insert(
            Operation::PasswordReset,
            OperationPolicy {
                max_attempts: 3,
                window: Duration::hours(1),
                block_duration: Duration::hours(1),
                skip_successful_attempts: true,
            },
        );
        overrides.insert(
            Operation::OtpVerify,
            OperationPolicy {
                max_attempts: 5,
                window: Duration::minutes(10),
                block_duration: Duration::minutes(30),
                skip_successful_attempts: true,
            },
        );
        overrides.insert(
            Operation::TokenRefresh,
            OperationPolicy {
                max_attempts: 10,
                window: Duration::minutes(5),
                block_duration: Duration::minutes(5),
                skip_successful_attempts: true,
            },
        );
        Self { default, overrides }
    }

    /// Policy for an operation, falling back to the default.
    pub fn policy(&self, operation: Operation) -> &OperationPolicy {
        self.overrides.get(&operation).unwrap_or(&self.default)
    }

    /// Replace the policy for one operation.
    pub fn set_override(&mut self, operation: Operation, policy: OperationPolicy) {
        self.overrides.insert(operation, policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_string_forms_are_unique() {
        let strings: std::collections::HashSet<_> =
            Operation::ALL.iter().map(|op| op.as_str()).collect();
        assert_eq!(strings.len(), Operation::ALL.len());
    }

    #[test]
    fn test_operation_serde_uses_snake_case() {
        let json = serde_json::to_string(&Operation::PasswordReset).unwrap();
        assert_eq!(json, "\"password_reset\"");
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Operation::PasswordReset);
    }

    #[test]
    fn test_policy_defaults_come_from_config() {
        let mut config = SecurityConfig::default();
        config.max_attempts = 7;
        let policies = PolicySet::from_config(&config);

        assert_eq!(policies.policy(Operation::SignIn).max_attempts, 7);
        assert_eq!(policies.policy(Operation::SignUp).max_attempts, 7);
    }

    #[test]
    fn test_password_reset_is_tighter_than_default() {
        let policies = PolicySet::from_config(&SecurityConfig::default());
        let reset = policies.policy(Operation::PasswordReset);
        let default = policies.policy(Operation::SignIn);

        assert!(reset.max_attempts < default.max_attempts);
        assert!(reset.block_duration > default.block_duration);
    }

    #[test]
    fn test_override_replaces_policy() {
        let mut policies = PolicySet::from_config(&SecurityConfig::default());
        policies.set_override(
            Operation::SignIn,
            OperationPolicy {
                max_attempts: 2,
                window: Duration::minutes(1),
                block_duration: Duration::minutes(1),
                skip_successful_attempts: false,
            },
        );
        assert_eq!(policies.policy(Operation::SignIn).max_attempts, 2);
        assert!(!policies.policy(Operation::SignIn).skip_successful_attempts);
    }
}
