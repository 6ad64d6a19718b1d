//! Key/value storage abstraction for the Driftline client.
//!
//! This crate provides the storage seam every security service is built
//! on: a small [`KeyValueStore`] trait with interchangeable backends
//! (in-memory, SQLite, failure-injecting), plus the [`SecureStore`]
//! envelope layer that adds integrity checksums, TTL expiry, and local
//! obfuscation on top of any backend.

mod envelope;
mod faulty;
mod keys;
mod memory;
mod obfuscation;
mod secure_store;
mod sqlite;
mod traits;

pub use envelope::{payload_checksum, SecureEnvelope, ENVELOPE_SCHEMA_VERSION};
pub use faulty::FaultyStore;
pub use keys::StorageKeys;
pub use memory::MemoryStore;
pub use obfuscation::ObfuscationKey;
pub use secure_store::SecureStore;
pub use sqlite::SqliteStore;
pub use traits::KeyValueStore;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend key/value store failure
    #[error("Backend storage error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Envelope cipher error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
