//! Storage key constants.

/// Storage keys and key prefixes used by the security stack
pub struct StorageKeys;

impl StorageKeys {
    /// Secure-store envelope namespace prefix
    pub const SECURE_PREFIX: &'static str = "driftline_secure_";

    /// Session id of the session driving this process
    pub const CURRENT_SESSION: &'static str = "driftline_current_session";

    /// Session envelope prefix (followed by session id)
    pub const SESSION_PREFIX: &'static str = "session_";

    /// Per-user session index prefix (followed by user id, JSON array)
    pub const SESSION_INDEX_PREFIX: &'static str = "session_index_";

    /// Rate-limit attempt record prefix (followed by operation + identifier)
    pub const ATTEMPT_PREFIX: &'static str = "driftline_attempts_";

    /// Account lockout record prefix (followed by user id)
    pub const LOCKOUT_PREFIX: &'static str = "driftline_lockout_";

    /// Cumulative per-user failure counter prefix (followed by user id)
    pub const FAILURE_COUNT_PREFIX: &'static str = "driftline_failures_";

    /// Mirrored anti-forgery tokens (JSON array)
    pub const CSRF_TOKENS: &'static str = "driftline_csrf_tokens";

    /// Mirrored form tokens (JSON array)
    pub const FORM_TOKENS: &'static str = "driftline_form_tokens";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys_unique() {
        let keys = vec![
            StorageKeys::SECURE_PREFIX,
            StorageKeys::CURRENT_SESSION,
            StorageKeys::SESSION_PREFIX,
            StorageKeys::SESSION_INDEX_PREFIX,
            StorageKeys::ATTEMPT_PREFIX,
            StorageKeys::LOCKOUT_PREFIX,
            StorageKeys::FAILURE_COUNT_PREFIX,
            StorageKeys::CSRF_TOKENS,
            StorageKeys::FORM_TOKENS,
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len(), "Storage keys must be unique");
    }

    #[test]
    fn test_storage_keys_non_empty() {
        assert!(!StorageKeys::SECURE_PREFIX.is_empty());
        assert!(!StorageKeys::CURRENT_SESSION.is_empty());
        assert!(!StorageKeys::CSRF_TOKENS.is_empty());
    }
}
