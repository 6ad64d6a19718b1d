//! Fingerprint generation and caching.

use crate::{EnvironmentProbe, EnvironmentSnapshot};
use chrono::{DateTime, Utc};
use client_config_and_utils::Clock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Length of the fingerprint identifier in hex characters.
pub const FINGERPRINT_LENGTH: usize = 32;

/// A device fingerprint: truncated digest plus the raw components it
/// was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// Truncated SHA-256 of the canonical component serialization.
    pub hash: String,
    pub components: EnvironmentSnapshot,
    pub generated_at: DateTime<Utc>,
    /// False when the probe failed and the hash is a random fallback.
    /// Unstable fingerprints must not be used for trust decisions that
    /// span sessions.
    pub stable: bool,
}

/// Generates and caches the device fingerprint.
///
/// The first `generate` probes the environment and caches the result;
/// later calls return the cached fingerprint. `regenerate` forces a
/// fresh probe.
pub struct FingerprintGenerator {
    probe: Arc<dyn EnvironmentProbe>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<DeviceFingerprint>>,
}

impl FingerprintGenerator {
    pub fn new(probe: Arc<dyn EnvironmentProbe>, clock: Arc<dyn Clock>) -> Self {
        Self {
            probe,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Get the device fingerprint, probing on first use.
    pub fn generate(&self) -> DeviceFingerprint {
        let mut cached = self.cached.lock().unwrap();
        if let Some(fingerprint) = cached.as_ref() {
            return fingerprint.clone();
        }
        let fingerprint = self.compute();
        *cached = Some(fingerprint.clone());
        fingerprint
    }

    /// Discard the cache and probe again.
    pub fn regenerate(&self) -> DeviceFingerprint {
        let fingerprint = self.compute();
        let mut cached = self.cached.lock().unwrap();
        *cached = Some(fingerprint.clone());
        fingerprint
    }

    fn compute(&self) -> DeviceFingerprint {
        let now = self.clock.now();
        match self.probe.probe() {
            Ok(snapshot) => {
                let hash = hash_components(&snapshot);
                debug!(hash, "device fingerprint generated");
                DeviceFingerprint {
                    hash,
                    components: snapshot,
                    generated_at: now,
                    stable: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "environment probe failed, falling back to unstable fingerprint");
                let snapshot = fallback_snapshot();
                DeviceFingerprint {
                    hash: fallback_hash(now, &snapshot.agent),
                    components: snapshot,
                    generated_at: now,
                    stable: false,
                }
            }
        }
    }
}

/// Truncated SHA-256 over the canonical component serialization.
fn hash_components(snapshot: &EnvironmentSnapshot) -> String {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.canonical_components().as_bytes());
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(FINGERPRINT_LENGTH);
    hash
}

/// Random identifier seeded by timestamp plus whatever agent hint is
/// still available. Deliberately not reproducible across sessions.
fn fallback_hash(now: DateTime<Utc>, partial_agent: &str) -> String {
    let mut entropy = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut entropy);

    let mut hasher = Sha256::new();
    hasher.update(now.timestamp_millis().to_le_bytes());
    hasher.update(partial_agent.as_bytes());
    hasher.update(entropy);
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(FINGERPRINT_LENGTH);
    hash
}

fn fallback_snapshot() -> EnvironmentSnapshot {
    EnvironmentSnapshot {
        agent: format!("unknown ({})", std::env::consts::OS),
        language: String::new(),
        platform: std::env::consts::OS.to_string(),
        screen_width: 0,
        screen_height: 0,
        color_depth: 0,
        pixel_ratio: 0.0,
        timezone: String::new(),
        touch_support: false,
        webgl_support: false,
        local_storage: false,
        session_storage: false,
        hardware_concurrency: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FingerprintError, FingerprintResult, FixedProbe};
    use client_config_and_utils::ManualClock;

    struct FailingProbe;

    impl EnvironmentProbe for FailingProbe {
        fn probe(&self) -> FingerprintResult<EnvironmentSnapshot> {
            Err(FingerprintError::Probe("no environment access".to_string()))
        }
    }

    fn generator_with(snapshot: EnvironmentSnapshot) -> FingerprintGenerator {
        FingerprintGenerator::new(
            Arc::new(FixedProbe::new(snapshot)),
            Arc::new(ManualClock::starting_now()),
        )
    }

    #[test]
    fn test_same_environment_same_hash() {
        let a = generator_with(EnvironmentSnapshot::default()).generate();
        let b = generator_with(EnvironmentSnapshot::default()).generate();

        assert_eq!(a.hash, b.hash);
        assert!(a.stable);
        assert_eq!(a.hash.len(), FINGERPRINT_LENGTH);
    }

    #[test]
    fn test_generate_is_cached() {
        let generator = generator_with(EnvironmentSnapshot::default());
        let first = generator.generate();
        let second = generator.generate();

        assert_eq!(first, second);
    }

    #[test]
    fn test_changing_one_characteristic_changes_hash() {
        let baseline = generator_with(EnvironmentSnapshot::default()).generate();

        let changed = generator_with(EnvironmentSnapshot {
            timezone: "Europe/Berlin".to_string(),
            ..Default::default()
        })
        .generate();

        assert_ne!(baseline.hash, changed.hash);
    }

    #[test]
    fn test_regenerate_reprobes() {
        let generator = generator_with(EnvironmentSnapshot::default());
        let first = generator.generate();
        let second = generator.regenerate();

        // Same probe, so same hash, but the cache was refreshed.
        assert_eq!(first.hash, second.hash);
        assert_eq!(generator.generate(), second);
    }

    #[test]
    fn test_probe_failure_falls_back_to_unstable() {
        let generator = FingerprintGenerator::new(
            Arc::new(FailingProbe),
            Arc::new(ManualClock::starting_now()),
        );

        let fingerprint = generator.generate();
        assert!(!fingerprint.stable);
        assert_eq!(fingerprint.hash.len(), FINGERPRINT_LENGTH);
    }

    #[test]
    fn test_fallback_is_not_reproducible() {
        let clock = Arc::new(ManualClock::starting_now());
        let a = FingerprintGenerator::new(Arc::new(FailingProbe), clock.clone()).generate();
        let b = FingerprintGenerator::new(Arc::new(FailingProbe), clock).generate();

        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_fingerprint_serde_roundtrip() {
        let fingerprint = generator_with(EnvironmentSnapshot::default()).generate();
        let json = serde_json::to_string(&fingerprint).unwrap();
        let parsed: DeviceFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, fingerprint);
    }
}
