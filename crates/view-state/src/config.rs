//! Configuration for the [`ViewStateManager`](crate::manager::ViewStateManager).
//!
//! Every knob has a working default; override the few you care about with
//! the builder methods:
//!
//! ```
//! use std::time::Duration;
//! use view_state::config::ManagerConfig;
//!
//! let config = ManagerConfig::default()
//!     .with_debounce(Duration::from_millis(250))
//!     .with_history_limit(50)
//!     .with_memory_budget(2 * 1024 * 1024);
//! assert_eq!(config.history_limit, 50);
//! ```

use std::time::Duration;

use crate::cache::{DEFAULT_EVICTION_TARGET, DEFAULT_MEMORY_BUDGET};
use crate::codec::DEFAULT_COMPRESSION_LEVEL;
use crate::history::DEFAULT_HISTORY_LIMIT;

/// Key the envelope is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "viewstate.envelope";

/// Keys with this prefix belong to the engine; any other than the current
/// storage key are stale and removed by emergency cleanup.
pub const STORAGE_KEY_PREFIX: &str = "viewstate.";

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Quiet period before a deferred save is written. Default: 500 ms.
    pub debounce: Duration,
    /// Snapshots kept per view. Default: 20.
    pub history_limit: usize,
    /// Compressed bytes the in-memory cache may hold. Default: 10 MiB.
    pub memory_budget: usize,
    /// Fraction of the budget eviction shrinks usage to. Default: 0.8.
    pub eviction_target: f64,
    /// Period of the housekeeping task. Default: 60 s.
    pub housekeeping_interval: Duration,
    /// Store utilization above which housekeeping runs emergency cleanup.
    /// Default: 0.9.
    pub storage_pressure: f64,
    /// Key the envelope is written under. Default: `viewstate.envelope`.
    pub storage_key: String,
    /// zlib level, 0 to 9. Default: 6.
    pub compression_level: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            history_limit: DEFAULT_HISTORY_LIMIT,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            eviction_target: DEFAULT_EVICTION_TARGET,
            housekeeping_interval: Duration::from_secs(60),
            storage_pressure: 0.9,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the memory budget in bytes.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_eviction_target(mut self, ratio: f64) -> Self {
        self.eviction_target = ratio;
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    pub fn with_storage_pressure(mut self, ratio: f64) -> Self {
        self.storage_pressure = ratio;
        self
    }

    /// Store the envelope under a different key. Should keep the
    /// [`STORAGE_KEY_PREFIX`] so cleanup recognizes older keys.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
}
