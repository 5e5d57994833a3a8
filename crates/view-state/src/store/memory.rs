//! In-memory store for tests and ephemeral sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{DEFAULT_QUOTA, PersistentStore, StorageUsage};
use crate::error::{StoreError, StoreResult};

/// In-memory [`PersistentStore`].
///
/// State is lost when the process exits. Beyond the quota it enforces like
/// a real medium, it counts writes and can be told to fail the next N writes
/// with `CapacityExceeded`, which makes quota-recovery paths testable.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
    quota: usize,
    writes: AtomicUsize,
    forced_failures: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            quota,
            writes: AtomicUsize::new(0),
            forced_failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` writes with `CapacityExceeded`.
    pub fn fail_next_writes(&self, n: usize) {
        self.forced_failures.store(n, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed a key directly, bypassing quota and counters.
    pub fn insert_raw(&self, key: impl Into<String>, bytes: Vec<u8>) {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.into(), bytes);
    }

    fn used(data: &HashMap<String, Vec<u8>>) -> usize {
        data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".into())
    }
}

impl PersistentStore for MemoryStore {
    fn name(&self) -> &str {
        "MemoryStore"
    }

    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let guard = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(guard.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut guard = self.data.write().map_err(|_| Self::poisoned())?;

        let requested = key.len() + bytes.len();
        let forced = self
            .forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let existing = guard.get(key).map_or(0, |v| key.len() + v.len());
        let used_after = Self::used(&guard) - existing + requested;
        if forced || used_after > self.quota {
            return Err(StoreError::CapacityExceeded {
                requested,
                quota: self.quota,
            });
        }

        guard.insert(key.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.data.write().map_err(|_| Self::poisoned())?;
        guard.remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let guard = self.data.read().map_err(|_| Self::poisoned())?;
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn estimate_usage(&self) -> StoreResult<StorageUsage> {
        let guard = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(StorageUsage {
            used: Self::used(&guard),
            quota: self.quota,
        })
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.data.read().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("keys", &count)
            .field("quota", &self.quota)
            .finish()
    }
}
