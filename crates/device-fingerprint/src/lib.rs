//! Device fingerprinting for device-trust decisions.
//!
//! Derives a stable pseudo-identifier from environment characteristics.
//! The identifier feeds session drift detection and the local storage
//! obfuscation key; it carries no PII beyond ambient client metadata.

mod generator;
mod probe;
mod similarity;

pub use generator::{DeviceFingerprint, FingerprintGenerator, FINGERPRINT_LENGTH};
pub use probe::{EnvironmentProbe, EnvironmentSnapshot, FixedProbe, HostProbe};
pub use similarity::{are_similar, similarity, DEFAULT_SIMILARITY_THRESHOLD};

use thiserror::Error;

/// Errors from environment probing.
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// The environment could not be probed at all
    #[error("Environment probe failed: {0}")]
    Probe(String),
}

/// Result type alias for fingerprint operations.
pub type FingerprintResult<T> = Result<T, FingerprintError>;
