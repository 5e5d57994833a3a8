//! Per-view bounded undo/redo history.
//!
//! Each view keeps a sequence of snapshots and a cursor pointing at the
//! current one. Undo moves the cursor back, redo forward. Pushing while the
//! cursor is behind the tail discards the redo branch. Once the sequence
//! exceeds the limit the oldest snapshot is dropped and the cursor shifts
//! down with it, so it still points at the snapshot just pushed.

use std::collections::{HashMap, VecDeque};

use crate::envelope::{ViewState, epoch_millis};

/// Default number of snapshots kept per view.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Immutable point-in-time copy of a view's state.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Epoch milliseconds when the snapshot was taken.
    pub timestamp: i64,
    pub state: ViewState,
}

#[derive(Debug, Default)]
struct ViewHistory {
    entries: VecDeque<HistoryEntry>,
    /// Index of the current entry. Meaningless while `entries` is empty.
    cursor: usize,
}

impl ViewHistory {
    fn push(&mut self, state: ViewState, limit: usize) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(HistoryEntry {
            timestamp: epoch_millis(),
            state,
        });
        while self.entries.len() > limit {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len().saturating_sub(1);
    }

    fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.cursor > 0
    }

    fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    fn undo(&mut self) -> Option<ViewState> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(|e| e.state.clone())
    }

    fn redo(&mut self) -> Option<ViewState> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).map(|e| e.state.clone())
    }
}

/// Undo/redo stacks for every view.
#[derive(Debug)]
pub struct HistoryStore {
    limit: usize,
    views: HashMap<String, ViewHistory>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryStore {
    /// Create a store keeping at most `limit` snapshots per view (minimum 1).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            views: HashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record a new snapshot for `view`, discarding any redo branch.
    pub fn push(&mut self, view: &str, state: ViewState) {
        self.views
            .entry(view.to_string())
            .or_default()
            .push(state, self.limit);
    }

    /// Push only if the view has no history yet. Returns whether it pushed.
    pub fn seed(&mut self, view: &str, state: ViewState) -> bool {
        if self.len(view) > 0 {
            return false;
        }
        self.push(view, state);
        true
    }

    /// Step back one snapshot. `None` when already at the oldest entry.
    pub fn undo(&mut self, view: &str) -> Option<ViewState> {
        self.views.get_mut(view)?.undo()
    }

    /// Step forward one snapshot. `None` when already at the newest entry.
    pub fn redo(&mut self, view: &str) -> Option<ViewState> {
        self.views.get_mut(view)?.redo()
    }

    /// Copy of the snapshot under the cursor.
    pub fn current(&self, view: &str) -> Option<ViewState> {
        let history = self.views.get(view)?;
        history
            .entries
            .get(history.cursor)
            .map(|e| e.state.clone())
    }

    pub fn can_undo(&self, view: &str) -> bool {
        self.views.get(view).is_some_and(ViewHistory::can_undo)
    }

    pub fn can_redo(&self, view: &str) -> bool {
        self.views.get(view).is_some_and(ViewHistory::can_redo)
    }

    pub fn len(&self, view: &str) -> usize {
        self.views.get(view).map_or(0, |h| h.entries.len())
    }

    /// Cursor position, if the view has any history.
    pub fn cursor(&self, view: &str) -> Option<usize> {
        self.views
            .get(view)
            .filter(|h| !h.entries.is_empty())
            .map(|h| h.cursor)
    }

    pub fn clear(&mut self, view: &str) {
        self.views.remove(view);
    }

    pub fn clear_all(&mut self) {
        self.views.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(n: i64) -> ViewState {
        let mut s = ViewState::new();
        s.insert("n".into(), json!(n));
        s
    }

    #[test]
    fn single_entry_cannot_undo() {
        let mut history = HistoryStore::default();
        history.push("v", snap(1));
        assert_eq!(history.undo("v"), None);
        assert_eq!(history.cursor("v"), Some(0));
    }

    #[test]
    fn undo_returns_previous_snapshot() {
        let mut history = HistoryStore::default();
        history.push("v", snap(1));
        history.push("v", snap(2));
        assert_eq!(history.undo("v"), Some(snap(1)));
        assert!(history.can_redo("v"));
    }

    #[test]
    fn undo_then_redo_is_symmetric() {
        let mut history = HistoryStore::default();
        for n in 1..=3 {
            history.push("v", snap(n));
        }
        assert_eq!(history.undo("v"), Some(snap(2)));
        assert_eq!(history.redo("v"), Some(snap(3)));
        assert_eq!(history.redo("v"), None);
        assert_eq!(history.cursor("v"), Some(2));
    }

    #[test]
    fn undo_past_start_does_not_move_cursor() {
        let mut history = HistoryStore::default();
        history.push("v", snap(1));
        history.push("v", snap(2));
        assert!(history.undo("v").is_some());
        assert_eq!(history.undo("v"), None);
        assert_eq!(history.undo("v"), None);
        assert_eq!(history.cursor("v"), Some(0));
        assert_eq!(history.redo("v"), Some(snap(2)));
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let mut history = HistoryStore::default();
        history.push("v", snap(1));
        history.push("v", snap(2));
        history.undo("v");
        history.push("v", snap(3));
        assert!(!history.can_redo("v"));
        assert_eq!(history.len("v"), 2);
        assert_eq!(history.undo("v"), Some(snap(1)));
    }

    #[test]
    fn length_is_bounded_and_cursor_tracks_last_push() {
        let limit = 20;
        let mut history = HistoryStore::new(limit);
        for n in 0..(limit as i64 + 5) {
            history.push("v", snap(n));
        }
        assert_eq!(history.len("v"), limit);
        assert_eq!(history.cursor("v"), Some(limit - 1));
        assert_eq!(history.current("v"), Some(snap(limit as i64 + 4)));
    }

    #[test]
    fn oldest_snapshots_dropped_first() {
        let mut history = HistoryStore::new(3);
        for n in 1..=5 {
            history.push("v", snap(n));
        }
        assert_eq!(history.undo("v"), Some(snap(4)));
        assert_eq!(history.undo("v"), Some(snap(3)));
        assert_eq!(history.undo("v"), None);
    }

    #[test]
    fn returned_snapshots_are_copies() {
        let mut history = HistoryStore::default();
        history.push("v", snap(1));
        history.push("v", snap(2));
        let mut copy = history.undo("v").unwrap();
        copy.insert("n".into(), json!(99));
        assert_eq!(history.current("v"), Some(snap(1)));
    }

    #[test]
    fn views_are_independent() {
        let mut history = HistoryStore::default();
        history.push("a", snap(1));
        history.push("a", snap(2));
        history.push("b", snap(10));
        history.clear("a");
        assert_eq!(history.len("a"), 0);
        assert_eq!(history.len("b"), 1);
        assert!(!history.can_undo("a"));
    }

    #[test]
    fn seed_only_fills_empty_history() {
        let mut history = HistoryStore::default();
        assert!(history.seed("v", snap(1)));
        assert!(!history.seed("v", snap(2)));
        assert_eq!(history.current("v"), Some(snap(1)));
    }
}
