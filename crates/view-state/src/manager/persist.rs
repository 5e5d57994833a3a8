//! Envelope reads and writes, capacity recovery, memory pressure.
//!
//! Every write serializes one envelope holding all views: the persisted
//! envelope is read first and the cached views are laid over it, so views
//! that were evicted from memory keep their persisted copy.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Inner, PersistStatus, SaveOutcome, Shared};
use crate::cache::Evicted;
use crate::config::STORAGE_KEY_PREFIX;
use crate::envelope::{Envelope, epoch_millis};
use crate::error::StateError;
use crate::events::StateEvent;

/// What an emergency cleanup reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Views dropped from the memory cache.
    pub dropped_views: Vec<String>,
    /// Stale keys removed from the store.
    pub removed_keys: Vec<String>,
}

/// Result of relieving memory pressure.
#[derive(Debug, Default)]
pub(super) struct MemoryRelief {
    pub flushed: bool,
    pub evicted: Vec<Evicted>,
}

impl Shared {
    /// Read the persisted envelope, migrating it when it was written by an
    /// older version. With `write_back`, a migrated envelope is written to
    /// the store so the next read skips the migration.
    ///
    /// An absent, unreadable or unparseable envelope is `None`.
    pub(super) fn read_envelope(
        &self,
        events: &mut Vec<StateEvent>,
        write_back: bool,
    ) -> Option<Envelope> {
        match self.try_read_envelope(events, write_back) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "failed to read view states");
                None
            }
        }
    }

    /// Like [`read_envelope`](Self::read_envelope), but a failing store read
    /// is an error rather than an absent envelope. Anything that rewrites the
    /// envelope must use this, or one failed read would wipe every view that
    /// is not cached.
    pub(super) fn try_read_envelope(
        &self,
        events: &mut Vec<StateEvent>,
        write_back: bool,
    ) -> Result<Option<Envelope>, StateError> {
        let key = &self.config.storage_key;
        let Some(bytes) = self.store.read(key)? else {
            return Ok(None);
        };
        let envelope = match Envelope::from_bytes(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %key, error = %e, "persisted envelope is unreadable, ignoring it");
                return Ok(None);
            }
        };
        if envelope.schema_version() == Some(self.migrations.target()) {
            return Ok(Some(envelope));
        }

        let outcome = self.migrations.migrate(envelope, &self.codec);
        events.push(StateEvent::Migrated {
            from: outcome.from.clone(),
            to: outcome.to.to_string(),
            dropped: outcome.dropped.clone(),
        });
        let mut envelope = outcome.envelope;
        if write_back {
            match self.write_envelope(&mut envelope) {
                Ok(bytes) => info!(from = %outcome.from, bytes, "wrote back migrated view states"),
                // The migrated data still serves this session.
                Err(e) => warn!(error = %e, "failed to write back migrated view states"),
            }
        }
        Ok(Some(envelope))
    }

    /// Stamp and write `envelope`. Returns the bytes written.
    pub(super) fn write_envelope(&self, envelope: &mut Envelope) -> Result<usize, StateError> {
        envelope.version = self.migrations.target().to_string();
        envelope.timestamp = epoch_millis();
        let bytes = envelope.to_bytes()?;
        self.store.write(&self.config.storage_key, &bytes)?;
        Ok(bytes.len())
    }

    /// Merge every cached view over the persisted envelope and write it.
    fn write_cached(&self, inner: &Inner, events: &mut Vec<StateEvent>) -> Result<(), StateError> {
        let mut envelope = self.try_read_envelope(events, false)?.unwrap_or_default();
        for (view, entry) in inner.cache.iter() {
            envelope.states.insert(view.to_string(), entry.clone());
        }
        let bytes = self.write_envelope(&mut envelope)?;
        info!(
            store = self.store.name(),
            views = envelope.states.len(),
            bytes,
            "persisted view states"
        );
        events.push(StateEvent::Persisted {
            views: envelope.states.len(),
            bytes,
        });
        Ok(())
    }

    /// Write all cached views now and cancel every pending timer.
    ///
    /// When the store is full, emergency cleanup runs once (sparing the
    /// active view and the `protect` views) and the write is retried once.
    /// If that fails too, the cached states stay in memory as `Unsaved`.
    pub(super) fn persist(
        &self,
        inner: &mut Inner,
        events: &mut Vec<StateEvent>,
        protect: &[&str],
    ) -> SaveOutcome {
        inner.cancel_all_timers();

        let result = match self.write_cached(inner, events) {
            Err(e) if e.is_capacity_exceeded() => {
                warn!(error = %e, "store is full, running emergency cleanup before retrying");
                self.emergency_cleanup(inner, events, protect);
                self.write_cached(inner, events)
            }
            other => other,
        };

        let status = match &result {
            Ok(()) => PersistStatus::Persisted,
            Err(e) => {
                warn!(error = %e, "view states could not be persisted, keeping them in memory");
                events.push(StateEvent::PersistFailed {
                    reason: e.to_string(),
                });
                PersistStatus::Unsaved
            }
        };
        let views: Vec<String> = inner.cache.iter().map(|(v, _)| v.to_string()).collect();
        for view in views {
            inner.status.insert(view, status);
        }

        if result.is_ok() {
            SaveOutcome::Persisted
        } else {
            SaveOutcome::MemoryOnly
        }
    }

    /// Emergency cleanup outside a failed write. Pending and unsaved views
    /// are written first; any that still could not be written stay cached.
    pub(super) fn cleanup_after_flush(
        &self,
        inner: &mut Inner,
        events: &mut Vec<StateEvent>,
    ) -> CleanupReport {
        let unwritten = |inner: &Inner| -> Vec<String> {
            inner
                .status
                .iter()
                .filter(|(_, s)| **s != PersistStatus::Persisted)
                .map(|(view, _)| view.clone())
                .chain(inner.timers.keys().cloned())
                .collect()
        };

        let pending = unwritten(&*inner);
        if !pending.is_empty() {
            debug!(views = pending.len(), "flushing pending writes before emergency cleanup");
            let protect: Vec<&str> = pending.iter().map(String::as_str).collect();
            self.persist(inner, events, &protect);
        }
        let unsaved = unwritten(&*inner);
        let protect: Vec<&str> = unsaved.iter().map(String::as_str).collect();
        self.emergency_cleanup(inner, events, &protect)
    }

    /// Clear all history, drop cached views other than the active one and
    /// `protect`, and remove stale engine keys from the store.
    pub(super) fn emergency_cleanup(
        &self,
        inner: &mut Inner,
        events: &mut Vec<StateEvent>,
        protect: &[&str],
    ) -> CleanupReport {
        inner.history.clear_all();

        let mut keep: Vec<&str> = Vec::with_capacity(protect.len() + 1);
        keep.extend(inner.active.as_deref());
        keep.extend_from_slice(protect);
        let dropped_views = inner.cache.retain_only(&keep);
        for view in &dropped_views {
            inner.cancel_timer(view);
            inner.status.remove(view);
        }

        let removed_keys = match self.store.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(STORAGE_KEY_PREFIX) && *k != self.config.storage_key)
                .filter(|k| match self.store.remove(k) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key = %k, error = %e, "failed to remove stale key");
                        false
                    }
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list store keys");
                Vec::new()
            }
        };

        warn!(
            dropped_views = dropped_views.len(),
            removed_keys = removed_keys.len(),
            "emergency cleanup"
        );
        events.push(StateEvent::EmergencyCleanup {
            dropped_views: dropped_views.len(),
            removed_keys: removed_keys.clone(),
        });
        CleanupReport {
            dropped_views,
            removed_keys,
        }
    }

    /// When the cache is over budget, flush pending writes and evict
    /// least-recently-used views. Evicted views lose their history; their
    /// persisted copy is untouched.
    pub(super) fn relieve_memory_pressure(
        &self,
        inner: &mut Inner,
        events: &mut Vec<StateEvent>,
    ) -> MemoryRelief {
        if !inner.cache.is_over_budget() {
            return MemoryRelief::default();
        }
        let flushed = inner.has_unwritten();
        if flushed {
            debug!(used = inner.cache.used_bytes(), "over budget, flushing before eviction");
            self.persist(inner, events, &[]);
        }

        let active = inner.active.clone();
        let evicted = inner.cache.evict_if_over_budget(active.as_deref());
        for victim in &evicted {
            inner.history.clear(&victim.view);
            events.push(StateEvent::Evicted {
                view: victim.view.clone(),
                freed_bytes: victim.freed_bytes,
            });
        }
        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                used = inner.cache.used_bytes(),
                budget = inner.cache.budget(),
                "evicted cached views"
            );
        }
        MemoryRelief { flushed, evicted }
    }
}
