//! Secure envelope layer over any key/value backend.

use crate::{KeyValueStore, ObfuscationKey, SecureEnvelope, StorageKeys, StorageResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Duration;
use client_config_and_utils::Clock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

enum ReadFailure {
    Expired,
    Tampered(String),
    Malformed(String),
}

/// Envelope store with integrity checksums, TTL expiry, and optional
/// obfuscation.
///
/// Write failures propagate to the caller. Read failures never do: a
/// payload that cannot be decrypted, parsed, or verified is purged and
/// reported as absent, so callers see `None` instead of an error.
pub struct SecureStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cipher: Option<ObfuscationKey>,
    ttl: Duration,
}

impl SecureStore {
    /// Create a store over `store`.
    ///
    /// With `cipher = None` envelopes are persisted as plain base64 JSON
    /// with the checksum still enforced (the degraded mode for hosts
    /// without the cipher).
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        cipher: Option<ObfuscationKey>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            cipher,
            ttl,
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", StorageKeys::SECURE_PREFIX, key)
    }

    /// Wrap `value` in a checksummed envelope and persist it.
    pub fn set_secure<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let envelope = SecureEnvelope::seal(value, self.clock.now())?;
        let json = serde_json::to_string(&envelope)?;
        let encoded = match &self.cipher {
            Some(cipher) => cipher.seal(json.as_bytes())?,
            None => BASE64.encode(json.as_bytes()),
        };
        self.store.set(&self.storage_key(key), &encoded)
    }

    /// Load and unwrap an envelope.
    ///
    /// Returns `None` for absent, expired, tampered, or unreadable
    /// entries; everything but "absent" is purged on the way out.
    pub fn get_secure<T: Serialize + DeserializeOwned>(&self, key: &str) -> Option<T> {
        let storage_key = self.storage_key(key);
        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "secure store read failed");
                return None;
            }
        };

        match self.open_envelope::<T>(&raw) {
            Ok(value) => Some(value),
            Err(failure) => {
                if let Err(e) = self.store.remove(&storage_key) {
                    debug!(key, error = %e, "failed to purge bad secure entry");
                }
                match failure {
                    ReadFailure::Expired => {
                        debug!(key, "secure entry expired, purged");
                    }
                    ReadFailure::Tampered(detail) => {
                        warn!(key, detail, "secure entry failed integrity check, purged");
                    }
                    ReadFailure::Malformed(detail) => {
                        warn!(key, detail, "secure entry unreadable, purged");
                    }
                }
                None
            }
        }
    }

    fn open_envelope<T: Serialize + DeserializeOwned>(&self, raw: &str) -> Result<T, ReadFailure> {
        let json_bytes = match &self.cipher {
            Some(cipher) => cipher
                .open(raw)
                .map_err(|e| ReadFailure::Tampered(e.to_string()))?,
            None => BASE64
                .decode(raw)
                .map_err(|e| ReadFailure::Malformed(e.to_string()))?,
        };

        let envelope: SecureEnvelope<T> = serde_json::from_slice(&json_bytes)
            .map_err(|e| ReadFailure::Malformed(e.to_string()))?;

        if envelope.is_expired(self.clock.now(), self.ttl) {
            return Err(ReadFailure::Expired);
        }

        match envelope.checksum_matches() {
            Ok(true) => Ok(envelope.payload),
            Ok(false) => Err(ReadFailure::Tampered("checksum mismatch".to_string())),
            Err(e) => Err(ReadFailure::Malformed(e.to_string())),
        }
    }

    /// Delete an entry. Returns true if it existed.
    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        self.store.remove(&self.storage_key(key))
    }

    /// Delete every secure entry, leaving other keys in the backend
    /// untouched. Returns the number of entries removed.
    pub fn clear_all(&self) -> StorageResult<usize> {
        let keys = self.store.keys_with_prefix(StorageKeys::SECURE_PREFIX)?;
        let mut removed = 0;
        for key in &keys {
            if self.store.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
