//! Failure-injecting storage backend.

use crate::{KeyValueStore, MemoryStore, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// Test double whose reads and writes can be made to fail on demand.
///
/// Used to exercise the named failure policies: the rate limiter fails
/// open on storage errors, the session manager fails closed.
pub struct FaultyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FaultyStore {
    /// Create a store where everything succeeds until told otherwise.
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Create a store where every operation fails.
    pub fn failing() -> Self {
        let store = Self::new();
        store.set_fail_reads(true);
        store.set_fail_writes(true);
        store
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for FaultyStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_write()?;
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_read()?;
        self.inner.get(key)
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        self.check_write()?;
        self.inner.remove(key)
    }

    fn clear(&self) -> StorageResult<()> {
        self.check_write()?;
        self.inner.clear()
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check_read()?;
        self.inner.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_through_when_healthy() {
        let store = FaultyStore::new();
        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
    }

    #[test]
    fn test_failing_store_fails_everything() {
        let store = FaultyStore::failing();
        assert!(store.set("key", "value").is_err());
        assert!(store.get("key").is_err());
        assert!(store.remove("key").is_err());
        assert!(store.clear().is_err());
        assert!(store.keys().is_err());
    }

    #[test]
    fn test_read_failures_only() {
        let store = FaultyStore::new();
        store.set("key", "value").unwrap();
        store.set_fail_reads(true);

        assert!(store.get("key").is_err());
        assert!(store.set("key2", "x").is_ok());
    }

    #[test]
    fn test_recovers_when_failure_cleared() {
        let store = FaultyStore::failing();
        assert!(store.get("key").is_err());

        store.set_fail_reads(false);
        store.set_fail_writes(false);

        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
    }
}
