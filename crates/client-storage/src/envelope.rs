//! Integrity envelope for persisted payloads.

use crate::StorageResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current envelope schema version.
pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;

/// Wrapper persisted around every secure-store payload.
///
/// The checksum is recomputed on every read and compared against the
/// stored value; a mismatch means the entry was modified outside this
/// library and it is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureEnvelope<T> {
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub schema_version: u32,
}

impl<T: Serialize> SecureEnvelope<T> {
    /// Wrap a payload, computing its checksum.
    pub fn seal(payload: T, created_at: DateTime<Utc>) -> StorageResult<Self> {
        let checksum = payload_checksum(&payload)?;
        Ok(Self {
            payload,
            created_at,
            checksum,
            schema_version: ENVELOPE_SCHEMA_VERSION,
        })
    }

    /// Recompute the payload checksum and compare with the stored one.
    pub fn checksum_matches(&self) -> StorageResult<bool> {
        Ok(payload_checksum(&self.payload)? == self.checksum)
    }

    /// Whether the envelope has outlived `ttl` as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }
}

/// SHA-256 (hex) over the payload's canonical JSON serialization.
pub fn payload_checksum<T: Serialize>(payload: &T) -> StorageResult<String> {
    let canonical = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    fn sample() -> Payload {
        Payload {
            name: "driftline".to_string(),
            count: 3,
        }
    }

    #[test]
    fn test_seal_computes_checksum() {
        let envelope = SecureEnvelope::seal(sample(), Utc::now()).unwrap();
        assert_eq!(envelope.checksum.len(), 64);
        assert!(envelope.checksum_matches().unwrap());
        assert_eq!(envelope.schema_version, ENVELOPE_SCHEMA_VERSION);
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let a = payload_checksum(&sample()).unwrap();
        let b = payload_checksum(&sample()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_modified_payload_fails_checksum() {
        let mut envelope = SecureEnvelope::seal(sample(), Utc::now()).unwrap();
        envelope.payload.count = 99;
        assert!(!envelope.checksum_matches().unwrap());
    }

    #[test]
    fn test_envelope_serde_roundtrip() {
        let envelope = SecureEnvelope::seal(sample(), Utc::now()).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: SecureEnvelope<Payload> = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.payload, envelope.payload);
        assert_eq!(parsed.checksum, envelope.checksum);
        assert!(parsed.checksum_matches().unwrap());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let envelope = SecureEnvelope::seal(sample(), now).unwrap();

        assert!(!envelope.is_expired(now, Duration::hours(24)));
        assert!(!envelope.is_expired(now + Duration::hours(23), Duration::hours(24)));
        assert!(envelope.is_expired(now + Duration::hours(24), Duration::hours(24)));
        assert!(envelope.is_expired(now + Duration::days(2), Duration::hours(24)));
    }
}
