//! Configuration for the client security stack.
//!
//! All knobs are read at construction time. Invalid combinations are
//! reported by [`SecurityConfig::validate`] as an itemized list rather
//! than a panic or a single opaque error, so callers can surface every
//! problem at once.

use crate::{CoreError, CoreResult, Paths};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default application origin used for redirect allow-listing
/// (can be overridden at compile time via DRIFTLINE_APP_ORIGIN).
pub const DEFAULT_APP_ORIGIN: &str = match option_env!("DRIFTLINE_APP_ORIGIN") {
    Some(origin) => origin,
    None => "https://app.driftline.dev",
};

/// Sessions shorter than this are rejected by the validator.
const MIN_SESSION_TIMEOUT_MS: u64 = 60_000;

/// Security stack configuration.
///
/// Durations are milliseconds. Missing fields in a config file fall back
/// to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Application origin for OAuth redirect allow-listing.
    pub app_origin: String,

    // Rate limiting
    /// Failed attempts allowed per operation before blocking.
    pub max_attempts: u32,
    /// Sliding window over which attempts are counted.
    pub attempt_window_ms: u64,
    /// How long a per-operation block lasts.
    pub block_duration_ms: u64,
    /// First step of the progressive (advisory) delay.
    pub progressive_delay_base_ms: u64,
    /// Ceiling for the progressive delay before jitter.
    pub progressive_delay_max_ms: u64,
    /// Cumulative cross-operation failures before the account locks.
    /// Must exceed `max_attempts`.
    pub account_lockout_threshold: u32,
    /// How long an account lockout lasts.
    pub account_lockout_duration_ms: u64,

    // Sessions
    /// Session lifetime from creation/refresh.
    pub session_timeout_ms: u64,
    /// Sessions this close to expiry report `requires_refresh`.
    /// Must be smaller than `session_timeout_ms`.
    pub refresh_threshold_ms: u64,
    /// Sessions allowed per user before the oldest is evicted.
    pub max_concurrent_sessions: usize,
    /// Interval of the expired-session cleanup sweep.
    pub session_cleanup_interval_ms: u64,

    // Fingerprinting and storage
    /// Capture device fingerprints into sessions.
    pub fingerprinting_enabled: bool,
    /// Jaccard similarity at or above which two fingerprints are
    /// considered the same device. Range (0, 1].
    pub fingerprint_similarity_threshold: f64,
    /// Encrypt secure-store envelopes. When off, envelopes are stored
    /// as plain base64 JSON with the checksum still enforced.
    pub encryption_enabled: bool,
    /// Time-to-live for secure-store entries.
    pub secure_store_ttl_ms: u64,

    // Tokens
    /// Lifetime of generic anti-forgery tokens.
    pub csrf_token_ttl_ms: u64,
    /// Lifetime of form-scoped tokens.
    pub form_token_ttl_ms: u64,
    /// Maximum age of an OAuth state blob before it is rejected.
    pub oauth_state_max_age_ms: u64,
    /// Interval of the expired-token sweep.
    pub token_sweep_interval_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            app_origin: DEFAULT_APP_ORIGIN.to_string(),
            max_attempts: 5,
            attempt_window_ms: 15 * 60_000,
            block_duration_ms: 30 * 60_000,
            progressive_delay_base_ms: 1_000,
            progressive_delay_max_ms: 30_000,
            account_lockout_threshold: 10,
            account_lockout_duration_ms: 60 * 60_000,
            session_timeout_ms: 4 * 60 * 60_000,
            refresh_threshold_ms: 15 * 60_000,
            max_concurrent_sessions: 3,
            session_cleanup_interval_ms: 5 * 60_000,
            fingerprinting_enabled: true,
            fingerprint_similarity_threshold: 0.9,
            encryption_enabled: true,
            secure_store_ttl_ms: 24 * 60 * 60_000,
            csrf_token_ttl_ms: 30 * 60_000,
            form_token_ttl_ms: 60 * 60_000,
            oauth_state_max_age_ms: 30 * 60_000,
            token_sweep_interval_ms: 5 * 60_000,
        }
    }
}

/// A single problem found by [`SecurityConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl SecurityConfig {
    /// Create a config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables override whatever the file says.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SecurityConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from `DRIFTLINE_*` environment variables.
    fn load_from_env(&mut self) {
        if let Ok(level) = std::env::var("DRIFTLINE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(origin) = std::env::var("DRIFTLINE_APP_ORIGIN") {
            self.app_origin = origin;
        }
        override_from_env(&mut self.max_attempts, "DRIFTLINE_MAX_ATTEMPTS");
        override_from_env(&mut self.attempt_window_ms, "DRIFTLINE_ATTEMPT_WINDOW_MS");
        override_from_env(&mut self.block_duration_ms, "DRIFTLINE_BLOCK_DURATION_MS");
        override_from_env(
            &mut self.progressive_delay_base_ms,
            "DRIFTLINE_PROGRESSIVE_DELAY_BASE_MS",
        );
        override_from_env(
            &mut self.progressive_delay_max_ms,
            "DRIFTLINE_PROGRESSIVE_DELAY_MAX_MS",
        );
        override_from_env(
            &mut self.account_lockout_threshold,
            "DRIFTLINE_ACCOUNT_LOCKOUT_THRESHOLD",
        );
        override_from_env(
            &mut self.account_lockout_duration_ms,
            "DRIFTLINE_ACCOUNT_LOCKOUT_DURATION_MS",
        );
        override_from_env(&mut self.session_timeout_ms, "DRIFTLINE_SESSION_TIMEOUT_MS");
        override_from_env(
            &mut self.refresh_threshold_ms,
            "DRIFTLINE_REFRESH_THRESHOLD_MS",
        );
        override_from_env(
            &mut self.max_concurrent_sessions,
            "DRIFTLINE_MAX_CONCURRENT_SESSIONS",
        );
        override_from_env(
            &mut self.fingerprinting_enabled,
            "DRIFTLINE_FINGERPRINTING_ENABLED",
        );
        override_from_env(&mut self.encryption_enabled, "DRIFTLINE_ENCRYPTION_ENABLED");
        override_from_env(&mut self.secure_store_ttl_ms, "DRIFTLINE_SECURE_STORE_TTL_MS");
    }

    /// Check every knob and cross-field constraint.
    ///
    /// Returns one [`ConfigIssue`] per problem; an empty vec means the
    /// config is usable. Never panics, never stops at the first problem.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.max_attempts == 0 {
            issues.push(ConfigIssue::new("max_attempts", "must be at least 1"));
        }
        if self.attempt_window_ms == 0 {
            issues.push(ConfigIssue::new("attempt_window_ms", "must be positive"));
        }
        if self.block_duration_ms == 0 {
            issues.push(ConfigIssue::new("block_duration_ms", "must be positive"));
        }
        if self.progressive_delay_base_ms == 0 {
            issues.push(ConfigIssue::new(
                "progressive_delay_base_ms",
                "must be positive",
            ));
        }
        if self.progressive_delay_max_ms < self.progressive_delay_base_ms {
            issues.push(ConfigIssue::new(
                "progressive_delay_max_ms",
                "must be at least progressive_delay_base_ms",
            ));
        }
        if self.account_lockout_threshold <= self.max_attempts {
            issues.push(ConfigIssue::new(
                "account_lockout_threshold",
                "must exceed max_attempts; lockout is the higher, cross-operation threshold",
            ));
        }
        if self.account_lockout_duration_ms == 0 {
            issues.push(ConfigIssue::new(
                "account_lockout_duration_ms",
                "must be positive",
            ));
        }
        if self.session_timeout_ms < MIN_SESSION_TIMEOUT_MS {
            issues.push(ConfigIssue::new(
                "session_timeout_ms",
                format!("must be at least {}ms", MIN_SESSION_TIMEOUT_MS),
            ));
        }
        if self.refresh_threshold_ms >= self.session_timeout_ms {
            issues.push(ConfigIssue::new(
                "refresh_threshold_ms",
                "must be smaller than session_timeout_ms",
            ));
        }
        if self.max_concurrent_sessions == 0 {
            issues.push(ConfigIssue::new(
                "max_concurrent_sessions",
                "must be at least 1",
            ));
        }
        if self.session_cleanup_interval_ms == 0 {
            issues.push(ConfigIssue::new(
                "session_cleanup_interval_ms",
                "must be positive",
            ));
        }
        if !(self.fingerprint_similarity_threshold > 0.0
            && self.fingerprint_similarity_threshold <= 1.0)
        {
            issues.push(ConfigIssue::new(
                "fingerprint_similarity_threshold",
                "must be in (0, 1]",
            ));
        }
        if self.secure_store_ttl_ms == 0 {
            issues.push(ConfigIssue::new("secure_store_ttl_ms", "must be positive"));
        }
        if self.csrf_token_ttl_ms == 0 {
            issues.push(ConfigIssue::new("csrf_token_ttl_ms", "must be positive"));
        }
        if self.form_token_ttl_ms == 0 {
            issues.push(ConfigIssue::new("form_token_ttl_ms", "must be positive"));
        }
        if self.oauth_state_max_age_ms == 0 {
            issues.push(ConfigIssue::new(
                "oauth_state_max_age_ms",
                "must be positive",
            ));
        }
        if self.token_sweep_interval_ms == 0 {
            issues.push(ConfigIssue::new(
                "token_sweep_interval_ms",
                "must be positive",
            ));
        }
        if Url::parse(&self.app_origin).is_err() {
            issues.push(ConfigIssue::new("app_origin", "must be an absolute URL"));
        }

        issues
    }

    /// Get the application origin as a parsed URL.
    pub fn app_origin_url(&self) -> CoreResult<Url> {
        Url::parse(&self.app_origin).map_err(CoreError::from)
    }

    pub fn attempt_window(&self) -> Duration {
        Duration::milliseconds(self.attempt_window_ms as i64)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::milliseconds(self.block_duration_ms as i64)
    }

    pub fn account_lockout_duration(&self) -> Duration {
        Duration::milliseconds(self.account_lockout_duration_ms as i64)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::milliseconds(self.session_timeout_ms as i64)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::milliseconds(self.refresh_threshold_ms as i64)
    }

    pub fn secure_store_ttl(&self) -> Duration {
        Duration::milliseconds(self.secure_store_ttl_ms as i64)
    }

    pub fn csrf_token_ttl(&self) -> Duration {
        Duration::milliseconds(self.csrf_token_ttl_ms as i64)
    }

    pub fn form_token_ttl(&self) -> Duration {
        Duration::milliseconds(self.form_token_ttl_ms as i64)
    }

    pub fn oauth_state_max_age(&self) -> Duration {
        Duration::milliseconds(self.oauth_state_max_age_ms as i64)
    }
}

fn override_from_env<T: std::str::FromStr>(slot: &mut T, var: &str) {
    if let Some(value) = std::env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
    {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = SecurityConfig::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.max_attempts, 5);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_refresh_threshold_must_be_below_timeout() {
        let mut config = SecurityConfig::default();
        config.refresh_threshold_ms = config.session_timeout_ms;

        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "refresh_threshold_ms"));
    }

    #[test]
    fn test_session_timeout_floor() {
        let mut config = SecurityConfig::default();
        config.session_timeout_ms = 5_000;
        config.refresh_threshold_ms = 1_000;

        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "session_timeout_ms"));
    }

    #[test]
    fn test_lockout_threshold_must_exceed_max_attempts() {
        let mut config = SecurityConfig::default();
        config.account_lockout_threshold = config.max_attempts;

        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "account_lockout_threshold"));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let mut config = SecurityConfig::default();
        config.max_attempts = 0;

        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "max_attempts"));
    }

    #[test]
    fn test_similarity_threshold_range() {
        let mut config = SecurityConfig::default();
        config.fingerprint_similarity_threshold = 1.5;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.field == "fingerprint_similarity_threshold"));

        config.fingerprint_similarity_threshold = 0.0;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.field == "fingerprint_similarity_threshold"));

        config.fingerprint_similarity_threshold = 1.0;
        assert!(config
            .validate()
            .iter()
            .all(|i| i.field != "fingerprint_similarity_threshold"));
    }

    #[test]
    fn test_bad_origin_rejected() {
        let mut config = SecurityConfig::default();
        config.app_origin = "not a url".to_string();

        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "app_origin"));
    }

    #[test]
    fn test_validator_collects_all_issues() {
        let mut config = SecurityConfig::default();
        config.max_attempts = 0;
        config.attempt_window_ms = 0;
        config.app_origin = "nope".to_string();

        let issues = config.validate();
        assert!(issues.len() >= 3);
    }

    #[test]
    fn test_config_load_from_partial_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "max_attempts": 3
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = SecurityConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(
            config.session_timeout_ms,
            SecurityConfig::default().session_timeout_ms
        );
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = SecurityConfig::default();
        config.log_level = "trace".to_string();
        config.max_attempts = 7;
        config.account_lockout_threshold = 14;

        config.save(&paths).unwrap();

        let loaded = SecurityConfig::load(&paths).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.max_attempts, 7);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = SecurityConfig::load(&paths).unwrap();
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("DRIFTLINE_MAX_ATTEMPTS", "9");
        let config = SecurityConfig::new();
        std::env::remove_var("DRIFTLINE_MAX_ATTEMPTS");

        assert_eq!(config.max_attempts, 9);
    }

    #[test]
    fn test_duration_accessors() {
        let config = SecurityConfig::default();
        assert_eq!(config.attempt_window(), Duration::minutes(15));
        assert_eq!(config.session_timeout(), Duration::hours(4));
        assert_eq!(config.secure_store_ttl(), Duration::hours(24));
    }

    #[test]
    fn test_app_origin_url_parse() {
        let config = SecurityConfig::default();
        let url = config.app_origin_url().unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn test_config_issue_display() {
        let issue = ConfigIssue::new("max_attempts", "must be at least 1");
        assert_eq!(issue.to_string(), "max_attempts: must be at least 1");
    }
}
