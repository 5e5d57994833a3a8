//! The public facade over the engine.
//!
//! [`ViewStateManager`] is a cheap `Clone` handle; every clone shares one
//! cache, one history store and one persistence pipeline. Construct it once
//! at startup and hand clones to whatever needs view state.
//!
//! ```text
//! save_state ──► validate ──► history.push ──► compress ──► cache.put
//!                                                              │
//!                              debounce timer (500 ms) ◄───────┘
//!                                      │
//!                                      ▼
//!                         store.write(envelope of all views)
//! ```
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`save_state`](ViewStateManager::save_state) | Validate, record history, cache, schedule a write |
//! | [`load_state`](ViewStateManager::load_state) | Cache first, then the store (migrating old envelopes) |
//! | [`undo`](ViewStateManager::undo) / [`redo`](ViewStateManager::redo) | Move through history, re-cache the result |
//! | [`on_view_changed`](ViewStateManager::on_view_changed) | Capture and save the outgoing view, switch active |
//! | [`run_housekeeping`](ViewStateManager::run_housekeeping) | Evict over budget, clean up when storage is tight |
//! | [`flush`](ViewStateManager::flush) / [`shutdown`](ViewStateManager::shutdown) | Write pending state now |
//!
//! No operation returns an error. Storage, codec and migration failures are
//! logged with `warn!`, published as [`StateEvent`]s, and surface as a
//! [`SaveOutcome`] or a `None`.

mod debounce;
mod host;
mod housekeeping;
mod persist;

pub use host::{CaptureState, HostEvent};
pub use housekeeping::HousekeepingReport;
pub use persist::CleanupReport;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Evicted, MemoryCache};
use crate::codec::StateCodec;
use crate::config::ManagerConfig;
use crate::envelope::{CompressedEntry, ViewState, epoch_millis};
use crate::error::StateError;
use crate::events::{EventHandler, NoopHandler, StateEvent};
use crate::history::HistoryStore;
use crate::migration::MigrationEngine;
use crate::schema::SchemaValidator;
use crate::store::PersistentStore;

use debounce::PendingTimer;

/// Where a view's latest state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStatus {
    /// Only in memory; the last write attempt failed or none was made.
    Unsaved,
    /// A debounced write is scheduled.
    PendingWrite,
    /// The durable store holds the latest state.
    Persisted,
}

/// Result of [`ViewStateManager::save_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The state failed schema validation; nothing changed.
    Rejected,
    /// Cached; a debounced write will persist it.
    Pending,
    /// Cached and written to the store.
    Persisted,
    /// Cached, but the store refused the write even after emergency cleanup.
    MemoryOnly,
}

impl SaveOutcome {
    /// Whether the state was accepted into memory.
    pub fn is_accepted(self) -> bool {
        !matches!(self, SaveOutcome::Rejected)
    }
}

/// Per-view diagnostics returned by [`ViewStateManager::get_state_summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub view: String,
    /// Compressed bytes.
    pub size: usize,
    pub original_size: usize,
    pub compression_ratio: f64,
    pub history_length: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Epoch milliseconds of the last save (or of the persisted envelope).
    pub last_modified: Option<i64>,
    pub status: PersistStatus,
    /// Whether the state is currently held in the memory cache.
    pub cached: bool,
}

impl StateSummary {
    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.and_then(DateTime::from_timestamp_millis)
    }
}

/// Memory cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub views: usize,
    pub used_bytes: usize,
    pub budget: usize,
    pub target_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    fn of(cache: &MemoryCache) -> Self {
        Self {
            views: cache.len(),
            used_bytes: cache.used_bytes(),
            budget: cache.budget(),
            target_bytes: cache.target_bytes(),
            hits: cache.hits(),
            misses: cache.misses(),
            hit_rate: cache.hit_rate(),
        }
    }
}

// ── Shared state ───────────────────────────────────────────────────

/// Everything guarded by the manager's lock.
struct Inner {
    cache: MemoryCache,
    history: HistoryStore,
    status: HashMap<String, PersistStatus>,
    last_modified: HashMap<String, i64>,
    timers: HashMap<String, PendingTimer>,
    /// Bumped for every armed timer; a firing timer whose generation no
    /// longer matches has been superseded.
    generation: u64,
    active: Option<String>,
}

impl Inner {
    fn new(config: &ManagerConfig) -> Self {
        Self {
            cache: MemoryCache::new(config.memory_budget).with_target_ratio(config.eviction_target),
            history: HistoryStore::new(config.history_limit),
            status: HashMap::new(),
            last_modified: HashMap::new(),
            timers: HashMap::new(),
            generation: 0,
            active: None,
        }
    }

    fn status_of(&self, view: &str) -> Option<PersistStatus> {
        self.status.get(view).copied()
    }

    /// Any view waiting on a timer or left unsaved by a failed write.
    fn has_unwritten(&self) -> bool {
        !self.timers.is_empty()
            || self.status.values().any(|s| *s != PersistStatus::Persisted)
    }

    fn forget(&mut self, view: &str) {
        self.cancel_timer(view);
        self.cache.remove(view);
        self.history.clear(view);
        self.status.remove(view);
        self.last_modified.remove(view);
    }
}

struct Shared {
    config: ManagerConfig,
    codec: StateCodec,
    validator: SchemaValidator,
    migrations: MigrationEngine,
    store: Arc<dyn PersistentStore>,
    events: Arc<dyn EventHandler>,
    capture: Option<Arc<dyn CaptureState>>,
    inner: Mutex<Inner>,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, events: Vec<StateEvent>) {
        for event in &events {
            self.events.on_event(event);
        }
    }

    /// Run `f` under the lock, then publish the events it collected.
    /// Handlers therefore never run while the lock is held.
    fn with_lock<R>(&self, f: impl FnOnce(&mut Inner, &mut Vec<StateEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.lock();
            f(&mut inner, &mut events)
        };
        self.dispatch(events);
        result
    }

    /// Cache a freshly compressed state and schedule (or perform) its write.
    /// `snapshot` is pushed onto the view's history when present.
    fn commit(
        self: &Arc<Self>,
        inner: &mut Inner,
        events: &mut Vec<StateEvent>,
        view: &str,
        entry: CompressedEntry,
        snapshot: Option<ViewState>,
        immediate: bool,
    ) -> SaveOutcome {
        if let Some(state) = snapshot {
            inner.history.push(view, state);
        }
        let (size, compression_ratio) = (entry.size, entry.compression_ratio);
        inner.cache.put(view, entry);
        inner.last_modified.insert(view.to_string(), epoch_millis());

        let outcome = if immediate {
            inner.cancel_timer(view);
            self.persist(inner, events, &[view])
        } else if debounce::arm(self, inner, view) {
            SaveOutcome::Pending
        } else {
            debug!(view, "no async runtime, writing inline");
            self.persist(inner, events, &[view])
        };

        events.push(StateEvent::StateSaved {
            view: view.to_string(),
            size,
            compression_ratio,
            status: inner.status_of(view).unwrap_or(PersistStatus::Unsaved),
        });
        self.relieve_memory_pressure(inner, events);
        outcome
    }

    /// Persisted entry for `view`, without caching it.
    fn persisted_entry(
        &self,
        view: &str,
        events: &mut Vec<StateEvent>,
    ) -> Option<(CompressedEntry, i64)> {
        let mut envelope = self.read_envelope(events, false)?;
        let entry = envelope.states.remove(view)?;
        Some((entry, envelope.timestamp))
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        inner.cancel_all_timers();
        let slot = self.housekeeping.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`ViewStateManager`]. Obtain one with
/// [`ViewStateManager::builder`].
pub struct ViewStateManagerBuilder {
    store: Arc<dyn PersistentStore>,
    config: ManagerConfig,
    validator: SchemaValidator,
    migrations: MigrationEngine,
    events: Arc<dyn EventHandler>,
    capture: Option<Arc<dyn CaptureState>>,
}

impl ViewStateManagerBuilder {
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the stock view schemas.
    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_migrations(mut self, migrations: MigrationEngine) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.events = Arc::new(handler);
        self
    }

    /// Callback used by [`ViewStateManager::on_view_changed`] to snapshot
    /// the outgoing view.
    pub fn with_capture(mut self, capture: impl CaptureState + 'static) -> Self {
        self.capture = Some(Arc::new(capture));
        self
    }

    pub fn build(self) -> ViewStateManager {
        info!(
            store = self.store.name(),
            budget = self.config.memory_budget,
            debounce_ms = self.config.debounce.as_millis() as u64,
            "view state manager ready"
        );
        let inner = Inner::new(&self.config);
        ViewStateManager {
            shared: Arc::new(Shared {
                codec: StateCodec::new(self.config.compression_level),
                config: self.config,
                validator: self.validator,
                migrations: self.migrations,
                store: self.store,
                events: self.events,
                capture: self.capture,
                inner: Mutex::new(inner),
                housekeeping: Mutex::new(None),
            }),
        }
    }
}

// ── ViewStateManager ───────────────────────────────────────────────

/// Caches, versions and persists the working state of every view.
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use view_state::manager::{SaveOutcome, ViewStateManager};
/// use view_state::store::MemoryStore;
///
/// let manager = ViewStateManager::new(Arc::new(MemoryStore::new()));
/// let state = json!({"selectedFiles": ["a.csv"], "scrollPosition": 120});
/// let state = state.as_object().cloned().unwrap();
///
/// // No tokio runtime here, so the write happens inline.
/// assert_eq!(manager.save_state("discovery", state.clone(), false), SaveOutcome::Persisted);
/// assert_eq!(manager.load_state("discovery"), Some(state));
/// ```
#[derive(Clone)]
pub struct ViewStateManager {
    shared: Arc<Shared>,
}

impl ViewStateManager {
    /// Manager with default configuration and the stock view schemas.
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn PersistentStore>) -> ViewStateManagerBuilder {
        ViewStateManagerBuilder {
            store,
            config: ManagerConfig::default(),
            validator: SchemaValidator::with_builtin_views(),
            migrations: MigrationEngine::default(),
            events: Arc::new(NoopHandler),
            capture: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Record a new state for `view`.
    ///
    /// Invalid states are rejected with a warning and leave everything
    /// untouched. Valid ones become the view's cached state and a new
    /// history entry. With `immediate` the envelope is written before this
    /// returns; otherwise the view's debounce timer is (re)armed.
    pub fn save_state(&self, view: &str, state: ViewState, immediate: bool) -> SaveOutcome {
        if let Err(e) = self.shared.validator.ensure_valid(view, &state) {
            warn!(error = %e, "rejected view state");
            if let StateError::ValidationRejected { violations, .. } = e {
                self.shared.dispatch(vec![StateEvent::ValidationRejected {
                    view: view.to_string(),
                    violations,
                }]);
            }
            return SaveOutcome::Rejected;
        }

        let entry = match self.shared.codec.compress(&state) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(view, error = %e, "failed to encode view state");
                return SaveOutcome::Rejected;
            }
        };

        self.shared.with_lock(|inner, events| {
            self.shared
                .commit(inner, events, view, entry, Some(state), immediate)
        })
    }

    /// A state pushed by the host rather than captured from the view.
    /// Goes through the same validation and history path as
    /// [`save_state`](Self::save_state).
    pub fn apply_external_update(
        &self,
        view: &str,
        state: ViewState,
        immediate: bool,
    ) -> SaveOutcome {
        debug!(view, immediate, "external state update");
        self.save_state(view, state, immediate)
    }

    /// The latest state for `view`, or `None` if it has never been saved or
    /// its data is unusable.
    ///
    /// A cache miss reads the envelope from the store. Envelopes written by
    /// an older version are migrated and written back.
    pub fn load_state(&self, view: &str) -> Option<ViewState> {
        self.shared.with_lock(|inner, events| {
            if let Some(entry) = inner.cache.get(view).cloned() {
                match self.shared.codec.decompress(&entry) {
                    Ok(state) => return Some(state),
                    Err(e) => {
                        warn!(view, error = %e, "cached state is corrupt, falling back to store");
                        inner.cache.remove(view);
                        events.push(StateEvent::CorruptStateDropped {
                            view: view.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            let mut envelope = self.shared.read_envelope(events, true)?;
            let entry = envelope.states.remove(view)?;
            let state = match self.shared.codec.decompress(&entry) {
                Ok(state) => state,
                Err(e) => {
                    warn!(view, error = %e, "persisted state is corrupt, treating as absent");
                    events.push(StateEvent::CorruptStateDropped {
                        view: view.to_string(),
                        reason: e.to_string(),
                    });
                    return None;
                }
            };

            debug!(view, size = entry.size, "loaded view state from store");
            inner.cache.put(view, entry);
            inner.history.seed(view, state.clone());
            inner
                .status
                .entry(view.to_string())
                .or_insert(PersistStatus::Persisted);
            inner
                .last_modified
                .entry(view.to_string())
                .or_insert(envelope.timestamp);
            self.shared.relieve_memory_pressure(inner, events);
            Some(state)
        })
    }

    /// Step `view` back one history entry. The returned state becomes the
    /// view's current state and is scheduled for writing.
    pub fn undo(&self, view: &str) -> Option<ViewState> {
        self.step_history(view, HistoryStore::undo)
    }

    /// Step `view` forward one history entry.
    pub fn redo(&self, view: &str) -> Option<ViewState> {
        self.step_history(view, HistoryStore::redo)
    }

    fn step_history(
        &self,
        view: &str,
        step: fn(&mut HistoryStore, &str) -> Option<ViewState>,
    ) -> Option<ViewState> {
        self.shared.with_lock(|inner, events| {
            let state = step(&mut inner.history, view)?;
            match self.shared.codec.compress(&state) {
                Ok(entry) => {
                    self.shared
                        .commit(inner, events, view, entry, None, false);
                }
                Err(e) => warn!(view, error = %e, "failed to encode history entry"),
            }
            Some(state)
        })
    }

    pub fn clear_history(&self, view: &str) {
        self.shared.lock().history.clear(view);
    }

    /// Forget everything about `view`, including its persisted copy.
    pub fn clear_view(&self, view: &str) {
        self.shared.with_lock(|inner, events| {
            inner.forget(view);
            info!(view, "cleared view state");
            let Some(mut envelope) = self.shared.read_envelope(events, false) else {
                return;
            };
            if envelope.states.remove(view).is_some() {
                if let Err(e) = self.shared.write_envelope(&mut envelope) {
                    warn!(view, error = %e, "failed to remove persisted view state");
                }
            }
        });
    }

    /// Forget every view and delete the persisted envelope. The active view
    /// pointer is kept.
    pub fn clear_all(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_all_timers();
        inner.cache.clear();
        inner.history.clear_all();
        inner.status.clear();
        inner.last_modified.clear();
        if let Err(e) = self.shared.store.remove(&self.shared.config.storage_key) {
            warn!(error = %e, "failed to remove persisted view states");
        }
        info!("cleared all view state");
    }

    /// Sizes, history position and persistence status for `view`.
    pub fn get_state_summary(&self, view: &str) -> Option<StateSummary> {
        self.shared.with_lock(|inner, events| {
            let cached = inner.cache.peek(view).cloned();
            let is_cached = cached.is_some();
            let (entry, last_modified, fallback) = match cached {
                Some(entry) => (
                    entry,
                    inner.last_modified.get(view).copied(),
                    PersistStatus::Unsaved,
                ),
                None => {
                    let (entry, timestamp) = self.shared.persisted_entry(view, events)?;
                    (entry, Some(timestamp), PersistStatus::Persisted)
                }
            };
            Some(StateSummary {
                view: view.to_string(),
                size: entry.size,
                original_size: entry.original_size,
                compression_ratio: entry.compression_ratio,
                history_length: inner.history.len(view),
                can_undo: inner.history.can_undo(view),
                can_redo: inner.history.can_redo(view),
                last_modified,
                status: inner.status_of(view).unwrap_or(fallback),
                cached: is_cached,
            })
        })
    }

    /// Diagnostic dump of every known view (cached or persisted), the cache
    /// counters and store usage.
    pub fn export_all(&self) -> Value {
        self.shared.with_lock(|inner, events| {
            let mut entries: BTreeMap<String, CompressedEntry> = self
                .shared
                .read_envelope(events, false)
                .map(|envelope| envelope.states)
                .unwrap_or_default();
            for (view, entry) in inner.cache.iter() {
                entries.insert(view.to_string(), entry.clone());
            }

            let mut views = serde_json::Map::new();
            for (view, entry) in &entries {
                let state = match self.shared.codec.decompress(entry) {
                    Ok(state) => Value::Object(state),
                    Err(e) => json!({ "error": e.to_string() }),
                };
                let cached = inner.cache.contains(view);
                let status = inner.status_of(view).unwrap_or(if cached {
                    PersistStatus::Unsaved
                } else {
                    PersistStatus::Persisted
                });
                views.insert(
                    view.clone(),
                    json!({
                        "state": state,
                        "size": entry.size,
                        "originalSize": entry.original_size,
                        "compressionRatio": entry.compression_ratio,
                        "historyLength": inner.history.len(view),
                        "cached": cached,
                        "status": status,
                    }),
                );
            }

            let storage = match self.shared.store.estimate_usage() {
                Ok(usage) => json!(usage),
                Err(e) => json!({ "error": e.to_string() }),
            };
            json!({
                "version": self.shared.migrations.target().to_string(),
                "exportedAt": epoch_millis(),
                "activeView": inner.active,
                "views": views,
                "cache": CacheStats::of(&inner.cache),
                "storage": storage,
            })
        })
    }

    /// Write every pending or unsaved view now.
    pub fn flush(&self) -> SaveOutcome {
        self.shared.with_lock(|inner, events| {
            if !inner.has_unwritten() {
                return SaveOutcome::Persisted;
            }
            self.shared.persist(inner, events, &[])
        })
    }

    /// Switch the active view.
    ///
    /// The outgoing view's current state is captured through the
    /// [`CaptureState`] callback and saved immediately. Without a callback,
    /// a pending write for the outgoing view is flushed instead.
    pub fn on_view_changed(&self, view: &str) {
        let previous = self.shared.lock().active.clone();
        if previous.as_deref() == Some(view) {
            return;
        }

        let mut captured = false;
        if let (Some(prev), Some(capture)) = (previous.as_deref(), self.shared.capture.as_ref()) {
            match capture.capture(prev) {
                Some(state) => {
                    self.save_state(prev, state, true);
                    captured = true;
                }
                None => debug!(view = prev, "nothing captured for outgoing view"),
            }
        }

        self.shared.with_lock(|inner, events| {
            if let Some(prev) = previous.as_deref() {
                if !captured && inner.timers.contains_key(prev) {
                    self.shared.persist(inner, events, &[prev]);
                }
            }
            let from = inner.active.replace(view.to_string());
            inner.cache.touch(view);
            info!(from = from.as_deref().unwrap_or("(none)"), to = view, "view transition");
            events.push(StateEvent::ViewTransition {
                from,
                to: view.to_string(),
            });
        });
    }

    pub fn active_view(&self) -> Option<String> {
        self.shared.lock().active.clone()
    }

    /// Persistence status of `view`, if the manager has seen it this session.
    pub fn status(&self, view: &str) -> Option<PersistStatus> {
        self.shared.lock().status_of(view)
    }

    /// Evict least-recently-used views if the cache is over budget. Pending
    /// writes are flushed first so eviction never loses unsaved state.
    pub fn evict_if_over_budget(&self) -> Vec<Evicted> {
        self.shared
            .with_lock(|inner, events| self.shared.relieve_memory_pressure(inner, events).evicted)
    }

    /// Reclaim storage: clear all history, drop cached views other than the
    /// active one, and remove stale keys from the store. Pending writes are
    /// flushed first; views that still fail to write stay cached.
    pub fn emergency_cleanup(&self) -> CleanupReport {
        self.shared
            .with_lock(|inner, events| self.shared.cleanup_after_flush(inner, events))
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats::of(&self.shared.lock().cache)
    }

    /// Stop housekeeping and write anything pending.
    pub fn shutdown(&self) -> SaveOutcome {
        self.stop_housekeeping();
        let outcome = self.flush();
        info!(outcome = ?outcome, "view state manager shut down");
        outcome
    }
}

impl std::fmt::Debug for ViewStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ViewStateManager")
            .field("store", &self.shared.store.name())
            .field("active", &inner.active)
            .field("cached_views", &inner.cache.len())
            .field("pending_writes", &inner.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STORAGE_KEY;
    use crate::envelope::Envelope;
    use crate::events::FnEventHandler;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn state(value: Value) -> ViewState {
        match value {
            Value::Object(map) => map,
            _ => panic!("test state must be an object"),
        }
    }

    fn recording() -> (Arc<Mutex<Vec<StateEvent>>>, impl EventHandler + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (
            seen,
            FnEventHandler::new(move |e: &StateEvent| sink.lock().unwrap().push(e.clone())),
        )
    }

    fn persisted(store: &MemoryStore) -> Envelope {
        Envelope::from_bytes(&store.read(DEFAULT_STORAGE_KEY).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn rejected_state_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let (seen, handler) = recording();
        let manager = ViewStateManager::builder(store.clone())
            .with_event_handler(handler)
            .build();

        let bad = state(json!({"selectedFiles": "not-a-list"}));
        assert_eq!(manager.save_state("discovery", bad, true), SaveOutcome::Rejected);
        assert_eq!(manager.load_state("discovery"), None);
        assert_eq!(store.write_count(), 0);
        assert!(matches!(
            seen.lock().unwrap().as_slice(),
            [StateEvent::ValidationRejected { .. }]
        ));
    }

    #[test]
    fn immediate_save_writes_envelope() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        let s = state(json!({"theme": "dark", "autoSave": true}));
        assert_eq!(manager.save_state("settings", s.clone(), true), SaveOutcome::Persisted);

        let envelope = persisted(&store);
        assert!(envelope.is_current());
        let codec = StateCodec::default();
        assert_eq!(codec.decompress(&envelope.states["settings"]).unwrap(), s);
        assert_eq!(manager.status("settings"), Some(PersistStatus::Persisted));
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_save_is_pending_until_timer() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        let s = state(json!({"groupBy": "date"}));
        assert_eq!(manager.save_state("organization", s, false), SaveOutcome::Pending);
        assert_eq!(manager.status("organization"), Some(PersistStatus::PendingWrite));
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(manager.status("organization"), Some(PersistStatus::Persisted));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_save_cancels_pending_timer() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        manager.save_state("settings", state(json!({"theme": "light"})), false);
        manager.save_state("settings", state(json!({"theme": "dark"})), true);
        assert_eq!(store.write_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn undo_rearms_write_with_previous_state() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        let first = state(json!({"activeTab": "overview"}));
        let second = state(json!({"activeTab": "details"}));
        manager.save_state("analysis", first.clone(), true);
        manager.save_state("analysis", second.clone(), true);

        assert_eq!(manager.undo("analysis"), Some(first.clone()));
        assert_eq!(manager.load_state("analysis"), Some(first.clone()));
        // Outside a runtime the re-armed write happens inline.
        let codec = StateCodec::default();
        assert_eq!(
            codec.decompress(&persisted(&store).states["analysis"]).unwrap(),
            first
        );

        assert_eq!(manager.redo("analysis"), Some(second.clone()));
        assert_eq!(manager.redo("analysis"), None);
        assert_eq!(manager.load_state("analysis"), Some(second));
    }

    #[test]
    fn summary_reports_sizes_and_history() {
        let manager = ViewStateManager::new(Arc::new(MemoryStore::new()));
        assert_eq!(manager.get_state_summary("discovery"), None);

        manager.save_state("discovery", state(json!({"scrollPosition": 1})), true);
        manager.save_state("discovery", state(json!({"scrollPosition": 2})), true);
        let summary = manager.get_state_summary("discovery").unwrap();
        assert_eq!(summary.history_length, 2);
        assert!(summary.can_undo);
        assert!(!summary.can_redo);
        assert!(summary.cached);
        assert_eq!(summary.status, PersistStatus::Persisted);
        assert!(summary.size > 0);
        assert!(summary.last_modified_at().is_some());
    }

    #[test]
    fn clear_view_removes_persisted_copy() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        manager.save_state("discovery", state(json!({"scrollPosition": 3})), true);
        manager.save_state("settings", state(json!({"theme": "dark"})), true);

        manager.clear_view("discovery");
        assert_eq!(manager.load_state("discovery"), None);
        assert!(!persisted(&store).states.contains_key("discovery"));
        assert!(manager.load_state("settings").is_some());
    }

    #[test]
    fn clear_all_forgets_everything() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        manager.save_state("settings", state(json!({"theme": "dark"})), true);
        manager.clear_all();
        assert_eq!(manager.load_state("settings"), None);
        assert_eq!(store.read(DEFAULT_STORAGE_KEY).unwrap(), None);
        assert_eq!(manager.cache_stats().views, 0);
    }

    #[test]
    fn export_includes_cached_and_persisted_views() {
        let store = Arc::new(MemoryStore::new());
        let manager = ViewStateManager::new(store.clone());
        manager.save_state("settings", state(json!({"theme": "dark"})), true);
        manager.on_view_changed("settings");

        let dump = manager.export_all();
        assert_eq!(dump["version"], "1.1");
        assert_eq!(dump["activeView"], "settings");
        assert_eq!(dump["views"]["settings"]["state"]["theme"], "dark");
        assert_eq!(dump["views"]["settings"]["status"], "persisted");
        assert_eq!(dump["cache"]["views"], 1);
    }

    #[test]
    fn view_change_without_capture_emits_transition() {
        let (seen, handler) = recording();
        let manager = ViewStateManager::builder(Arc::new(MemoryStore::new()))
            .with_event_handler(handler)
            .build();
        manager.on_view_changed("discovery");
        manager.on_view_changed("discovery");
        manager.on_view_changed("analysis");

        let transitions: Vec<(Option<String>, String)> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                StateEvent::ViewTransition { from, to } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (None, "discovery".to_string()),
                (Some("discovery".to_string()), "analysis".to_string()),
            ]
        );
        assert_eq!(manager.active_view().as_deref(), Some("analysis"));
    }

    #[test]
    fn handlers_may_call_back_into_manager() {
        let store = Arc::new(MemoryStore::new());
        let slot: Arc<Mutex<Option<ViewStateManager>>> = Arc::new(Mutex::new(None));
        let reentrant = slot.clone();
        let manager = ViewStateManager::builder(store)
            .with_event_handler(FnEventHandler::new(move |e: &StateEvent| {
                if let StateEvent::Persisted { .. } = e {
                    if let Some(m) = reentrant.lock().unwrap().as_ref() {
                        let _ = m.cache_stats();
                    }
                }
            }))
            .build();
        *slot.lock().unwrap() = Some(manager.clone());
        manager.save_state("settings", state(json!({"theme": "dark"})), true);
        slot.lock().unwrap().take();
    }
}
