//! Periodic maintenance.
//!
//! A pass relieves memory pressure (flush, then LRU eviction) and checks
//! store utilization; above the configured pressure ratio it runs
//! emergency cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::persist::CleanupReport;
use super::{Inner, Shared, ViewStateManager};
use crate::events::StateEvent;
use crate::store::StorageUsage;

/// What one housekeeping pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HousekeepingReport {
    /// Pending writes were flushed ahead of eviction.
    pub flushed: bool,
    /// Views evicted from the memory cache.
    pub evicted: Vec<String>,
    /// Store usage observed after eviction, if the store could report it.
    pub storage: Option<StorageUsage>,
    /// Set when storage pressure triggered emergency cleanup.
    pub cleanup: Option<CleanupReport>,
}

impl Shared {
    fn housekeeping_pass(&self, inner: &mut Inner, events: &mut Vec<StateEvent>) -> HousekeepingReport {
        let relief = self.relieve_memory_pressure(inner, events);
        let mut report = HousekeepingReport {
            flushed: relief.flushed,
            evicted: relief.evicted.into_iter().map(|e| e.view).collect(),
            ..Default::default()
        };

        match self.store.estimate_usage() {
            Ok(usage) => {
                report.storage = Some(usage);
                if usage.utilization() > self.config.storage_pressure {
                    warn!(
                        used = usage.used,
                        quota = usage.quota,
                        "storage nearly full"
                    );
                    report.cleanup = Some(self.cleanup_after_flush(inner, events));
                }
            }
            Err(e) => warn!(error = %e, "failed to estimate storage usage"),
        }
        report
    }
}

impl ViewStateManager {
    /// Run one housekeeping pass now.
    pub fn run_housekeeping(&self) -> HousekeepingReport {
        self.shared
            .with_lock(|inner, events| self.shared.housekeeping_pass(inner, events))
    }

    /// Run housekeeping every `housekeeping_interval` on the current tokio
    /// runtime, replacing any previously started task. Returns `false`
    /// outside a runtime.
    pub fn start_housekeeping(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("housekeeping needs a tokio runtime");
            return false;
        };
        let period = self
            .shared
            .config
            .housekeeping_interval
            .max(Duration::from_millis(1));
        let weak = Arc::downgrade(&self.shared);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let report = shared.with_lock(|inner, events| shared.housekeeping_pass(inner, events));
                debug!(
                    flushed = report.flushed,
                    evicted = report.evicted.len(),
                    cleanup = report.cleanup.is_some(),
                    "housekeeping pass"
                );
            }
        });

        let mut slot = self
            .shared
            .housekeeping
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        debug!(period_ms = period.as_millis() as u64, "housekeeping started");
        true
    }

    pub fn stop_housekeeping(&self) {
        let mut slot = self
            .shared
            .housekeeping
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::envelope::ViewState;
    use crate::manager::{PersistStatus, SaveOutcome};
    use crate::store::{MemoryStore, PersistentStore};
    use serde_json::json;

    fn state(value: serde_json::Value) -> ViewState {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn storage_pressure_triggers_cleanup() {
        let store = Arc::new(MemoryStore::with_quota(4096));
        store.insert_raw("viewstate.v0.discovery", vec![0; 3600]);
        store.insert_raw("unrelated", vec![1; 8]);
        let manager = ViewStateManager::new(store.clone());
        manager.on_view_changed("settings");
        manager.save_state("settings", state(json!({"theme": "dark"})), true);

        let report = manager.run_housekeeping();
        let cleanup = report.cleanup.expect("cleanup should run");
        assert_eq!(cleanup.removed_keys, vec!["viewstate.v0.discovery".to_string()]);
        assert!(store.read("unrelated").unwrap().is_some());
        assert!(manager.load_state("settings").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn storage_pressure_writes_pending_views_before_dropping_them() {
        let store = Arc::new(MemoryStore::with_quota(4096));
        store.insert_raw("viewstate.legacy", vec![0; 3750]);
        let manager = ViewStateManager::new(store.clone());
        manager.on_view_changed("settings");
        let discovery = state(json!({"scrollPosition": 42}));
        assert_eq!(
            manager.save_state("discovery", discovery.clone(), false),
            SaveOutcome::Pending
        );

        let report = manager.run_housekeeping();
        let cleanup = report.cleanup.expect("cleanup should run");
        assert_eq!(cleanup.dropped_views, vec!["discovery".to_string()]);
        assert_eq!(store.write_count(), 1);
        assert_eq!(manager.status("discovery"), None);
        assert_eq!(manager.load_state("discovery"), Some(discovery));
    }

    #[test]
    fn cleanup_keeps_views_that_could_not_be_written() {
        let store = Arc::new(MemoryStore::with_quota(4096));
        store.insert_raw("viewstate.legacy", vec![0; 3750]);
        let manager = ViewStateManager::new(store.clone());
        manager.on_view_changed("settings");
        let discovery = state(json!({"scrollPosition": 42}));
        store.fail_next_writes(2);
        assert_eq!(
            manager.save_state("discovery", discovery.clone(), true),
            SaveOutcome::MemoryOnly
        );

        store.fail_next_writes(2);
        let cleanup = manager.emergency_cleanup();
        assert!(cleanup.dropped_views.is_empty());
        assert_eq!(manager.status("discovery"), Some(PersistStatus::Unsaved));
        assert_eq!(manager.load_state("discovery"), Some(discovery));
    }

    #[test]
    fn relaxed_storage_leaves_everything() {
        let manager = ViewStateManager::new(Arc::new(MemoryStore::new()));
        manager.save_state("settings", state(json!({"theme": "dark"})), true);
        let report = manager.run_housekeeping();
        assert!(report.cleanup.is_none());
        assert!(report.evicted.is_empty());
        assert!(!report.flushed);
        assert!(report.storage.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_pass_runs_on_interval() {
        let store = Arc::new(MemoryStore::with_quota(4096));
        store.insert_raw("viewstate.legacy", vec![0; 3900]);
        let config = ManagerConfig::default().with_housekeeping_interval(Duration::from_secs(60));
        let manager = ViewStateManager::builder(store.clone())
            .with_config(config)
            .build();
        assert!(manager.start_housekeeping());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.read("viewstate.legacy").unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.read("viewstate.legacy").unwrap(), None);
        manager.stop_housekeeping();
    }

    #[test]
    fn start_outside_runtime_is_refused() {
        let manager = ViewStateManager::new(Arc::new(MemoryStore::new()));
        assert!(!manager.start_housekeeping());
    }
}
