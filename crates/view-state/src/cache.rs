//! In-memory LRU cache of compressed view states.
//!
//! Keeps the most recently used views' [`CompressedEntry`]s under a global
//! byte budget. Every `put` and `get` refreshes the view's position in the
//! LRU ledger. When usage goes over budget, [`MemoryCache::evict_if_over_budget`]
//! drops least-recently-used views, never the active one, until usage falls
//! to the eviction target (80% of budget by default). The gap between the
//! budget and the target keeps a cache hovering at the limit from evicting
//! on every save.

use std::collections::HashMap;

use tracing::debug;

use crate::envelope::CompressedEntry;

/// Default memory budget: 10 MiB of compressed state.
pub const DEFAULT_MEMORY_BUDGET: usize = 10 * 1024 * 1024;

/// Fraction of the budget eviction shrinks usage down to.
pub const DEFAULT_EVICTION_TARGET: f64 = 0.8;

#[derive(Debug, Clone)]
struct CachedView {
    entry: CompressedEntry,
    /// Logical last-access time; larger is more recent.
    last_access: u64,
}

/// A view dropped by eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub view: String,
    pub freed_bytes: usize,
}

/// Byte-budgeted LRU cache keyed by view name.
#[derive(Debug)]
pub struct MemoryCache {
    entries: HashMap<String, CachedView>,
    budget: usize,
    target_ratio: f64,
    used: usize,
    /// Monotonic access clock for the LRU ledger.
    clock: u64,
    /// Hits counter for diagnostics.
    hits: u64,
    /// Misses counter for diagnostics.
    misses: u64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }
}

impl MemoryCache {
    /// Create a cache with the given budget in bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            entries: HashMap::new(),
            budget,
            target_ratio: DEFAULT_EVICTION_TARGET,
            used: 0,
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Override the eviction target (clamped to `0.0..=1.0`).
    pub fn with_target_ratio(mut self, ratio: f64) -> Self {
        self.target_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Store the entry for `view`, replacing any previous one.
    pub fn put(&mut self, view: &str, entry: CompressedEntry) {
        let last_access = self.tick();
        let size = entry.size;
        if let Some(old) = self
            .entries
            .insert(view.to_string(), CachedView { entry, last_access })
        {
            self.used -= old.entry.size;
        }
        self.used += size;
    }

    /// Look up a view's entry, refreshing its last access.
    pub fn get(&mut self, view: &str) -> Option<&CompressedEntry> {
        let now = self.tick();
        match self.entries.get_mut(view) {
            Some(cached) => {
                self.hits += 1;
                cached.last_access = now;
                Some(&cached.entry)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up without touching the ledger or the counters.
    pub fn peek(&self, view: &str) -> Option<&CompressedEntry> {
        self.entries.get(view).map(|c| &c.entry)
    }

    /// Mark a view as just used. Returns false if it is not cached.
    pub fn touch(&mut self, view: &str) -> bool {
        let now = self.tick();
        match self.entries.get_mut(view) {
            Some(cached) => {
                cached.last_access = now;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, view: &str) -> bool {
        self.entries.contains_key(view)
    }

    pub fn remove(&mut self, view: &str) -> Option<CompressedEntry> {
        let cached = self.entries.remove(view)?;
        self.used -= cached.entry.size;
        Some(cached.entry)
    }

    /// Drop every view not named in `keep`. Returns the dropped view names.
    pub fn retain_only(&mut self, keep: &[&str]) -> Vec<String> {
        let dropped: Vec<String> = self
            .entries
            .keys()
            .filter(|view| !keep.contains(&view.as_str()))
            .cloned()
            .collect();
        for view in &dropped {
            self.remove(view);
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
    }

    /// Evict least-recently-used views until usage is at or under the
    /// eviction target. Does nothing while usage is within budget. The
    /// `active` view is never evicted, so the target may be unreachable.
    pub fn evict_if_over_budget(&mut self, active: Option<&str>) -> Vec<Evicted> {
        if self.used <= self.budget {
            return Vec::new();
        }
        let target = self.target_bytes();

        let mut candidates: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(view, _)| Some(view.as_str()) != active)
            .map(|(view, cached)| (cached.last_access, view.clone()))
            .collect();
        candidates.sort_unstable();

        let mut evicted = Vec::new();
        for (_, view) in candidates {
            if self.used <= target {
                break;
            }
            if let Some(entry) = self.remove(&view) {
                debug!(view = %view, freed = entry.size, used = self.used, "evicted cached view");
                evicted.push(Evicted {
                    view,
                    freed_bytes: entry.size,
                });
            }
        }
        evicted
    }

    /// Cached views with their entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CompressedEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), &v.entry))
    }

    /// Cached view names, least recently used first.
    pub fn views_by_recency(&self) -> Vec<String> {
        let mut views: Vec<(u64, &String)> = self
            .entries
            .iter()
            .map(|(view, cached)| (cached.last_access, view))
            .collect();
        views.sort_unstable();
        views.into_iter().map(|(_, v)| v.clone()).collect()
    }

    /// Bytes currently held.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Usage eviction shrinks down to.
    pub fn target_bytes(&self) -> usize {
        (self.budget as f64 * self.target_ratio) as usize
    }

    pub fn is_over_budget(&self) -> bool {
        self.used > self.budget
    }

    /// Number of cached views.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache hit count.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Cache miss count.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
