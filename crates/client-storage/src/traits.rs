//! Storage trait definitions.

use crate::StorageResult;

/// Trait for key/value storage backends.
///
/// Backends are last-write-wins per key with no cross-key atomicity;
/// callers must not assume two operations see a consistent snapshot.
pub trait KeyValueStore: Send + Sync {
    /// Store a value under a key, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns true if the key existed.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Delete every entry.
    fn clear(&self) -> StorageResult<()>;

    /// List all keys.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys that start with a given prefix.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    /// Number of stored entries.
    fn len(&self) -> StorageResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Whether the store holds no entries.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
