//! Durable key-value storage behind the engine.
//!
//! The engine treats the durable medium as an opaque byte store with a
//! quota. [`PersistentStore`] is the seam; two backends ship with the crate:
//!
//! | Backend | Use case |
//! |---------|----------|
//! | [`MemoryStore`] | Tests, ephemeral sessions, failure injection |
//! | [`FileStore`] | One file per key in a directory, atomic writes |
//!
//! Implementations must be `Send + Sync`; the manager calls them from
//! timer tasks as well as from the caller's task.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::Serialize;

use crate::error::StoreResult;

/// Default quota for the bundled backends (5 MiB, a typical browser
/// local-storage allowance).
pub const DEFAULT_QUOTA: usize = 5 * 1024 * 1024;

/// Bytes used and available in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used: usize,
    pub quota: usize,
}

impl StorageUsage {
    /// `used / quota`, or 0.0 for a zero quota.
    pub fn utilization(&self) -> f64 {
        if self.quota == 0 {
            0.0
        } else {
            self.used as f64 / self.quota as f64
        }
    }
}

/// Opaque durable key-value store with bounded capacity.
pub trait PersistentStore: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Read the value under `key`. `Ok(None)` when absent.
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the value under `key` atomically.
    ///
    /// Fails with [`StoreError::CapacityExceeded`](crate::error::StoreError::CapacityExceeded)
    /// when the write would exceed the quota; the previous value is kept.
    fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// All keys currently stored.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Current usage against the quota.
    fn estimate_usage(&self) -> StoreResult<StorageUsage>;
}
