//! Notifications emitted by the [`ViewStateManager`](crate::manager::ViewStateManager).
//!
//! The manager publishes [`StateEvent`]s fire-and-forget: handlers observe,
//! they cannot veto. Events are dispatched after the manager releases its
//! internal lock, so a handler may call back into the manager.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or hosts that don't listen |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`BroadcastHandler`] | Fan out to async subscribers over a channel |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::manager::PersistStatus;

/// Events emitted by the manager.
///
/// Serializes with a `type` discriminator, e.g.
/// `{"type":"view_transition","from":"discovery","to":"analysis"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// A state was accepted for a view (cached, maybe not yet persisted).
    #[serde(rename = "view_state_saved")]
    StateSaved {
        view: String,
        size: usize,
        compression_ratio: f64,
        status: PersistStatus,
    },
    /// The active view changed.
    ViewTransition { from: Option<String>, to: String },
    /// The envelope was written to the store.
    Persisted { views: usize, bytes: usize },
    /// A write failed even after emergency cleanup; states are memory-only.
    PersistFailed { reason: String },
    /// A view was dropped from the memory cache.
    Evicted { view: String, freed_bytes: usize },
    /// Emergency cleanup ran.
    EmergencyCleanup {
        dropped_views: usize,
        removed_keys: Vec<String>,
    },
    /// A save was rejected by the view's schema.
    ValidationRejected { view: String, violations: Vec<String> },
    /// A persisted envelope was upgraded on load.
    Migrated {
        from: String,
        to: String,
        dropped: Vec<String>,
    },
    /// A payload failed to decompress and was discarded.
    CorruptStateDropped { view: String, reason: String },
}

/// Handler for manager events.
///
/// The default implementation ignores everything.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &StateEvent) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use view_state::events::{EventHandler, FnEventHandler, StateEvent};
///
/// let transitions = Arc::new(AtomicUsize::new(0));
/// let counter = transitions.clone();
/// let handler = FnEventHandler::new(move |event| {
///     if let StateEvent::ViewTransition { .. } = event {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }
/// });
/// handler.on_event(&StateEvent::ViewTransition { from: None, to: "discovery".into() });
/// assert_eq!(transitions.load(Ordering::SeqCst), 1);
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&StateEvent) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&StateEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&StateEvent) + Send + Sync,
{
    fn on_event(&self, event: &StateEvent) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &StateEvent) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Broadcasts events to every subscriber of a `tokio::sync::broadcast`
/// channel. Slow subscribers lag and lose the oldest events; nobody blocks.
#[derive(Clone)]
pub struct BroadcastHandler {
    sender: broadcast::Sender<StateEvent>,
}

impl BroadcastHandler {
    /// Create a handler whose channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn from_sender(sender: broadcast::Sender<StateEvent>) -> Self {
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.sender.subscribe()
    }
}

impl EventHandler for BroadcastHandler {
    fn on_event(&self, event: &StateEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
    }
}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &StateEvent) {
        match event {
            StateEvent::StateSaved {
                view,
                size,
                compression_ratio,
                status,
            } => {
                debug!("Saved '{view}': {size} bytes (ratio {compression_ratio:.2}), {status:?}");
            }
            StateEvent::ViewTransition { from, to } => {
                info!("View transition: {} → {to}", from.as_deref().unwrap_or("(none)"));
            }
            StateEvent::Persisted { views, bytes } => {
                debug!("Persisted {views} view(s), {bytes} bytes");
            }
            StateEvent::PersistFailed { reason } => {
                warn!("View states kept in memory only: {reason}");
            }
            StateEvent::Evicted { view, freed_bytes } => {
                debug!("Evicted '{view}' from cache ({freed_bytes} bytes)");
            }
            StateEvent::EmergencyCleanup {
                dropped_views,
                removed_keys,
            } => {
                warn!(
                    "Emergency cleanup: dropped {dropped_views} cached view(s), removed {} stale key(s)",
                    removed_keys.len()
                );
            }
            StateEvent::ValidationRejected { view, violations } => {
                warn!("Rejected state for '{view}': {}", violations.join("; "));
            }
            StateEvent::Migrated { from, to, dropped } => {
                info!("Migrated view states {from} → {to} ({} dropped)", dropped.len());
            }
            StateEvent::CorruptStateDropped { view, reason } => {
                warn!("Discarded corrupt state for '{view}': {reason}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn composite_calls_all_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        let b = seen.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with_if(false, NoopHandler)
            .with(FnEventHandler::new(move |_| b.lock().unwrap().push("b")));
        handler.on_event(&StateEvent::PersistFailed {
            reason: "full".into(),
        });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn broadcast_reaches_subscribers() {
        let handler = BroadcastHandler::new(8);
        let mut rx = handler.subscribe();
        let event = StateEvent::ViewTransition {
            from: Some("discovery".into()),
            to: "analysis".into(),
        };
        handler.on_event(&event);
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        BroadcastHandler::new(1).on_event(&StateEvent::Persisted { views: 1, bytes: 2 });
    }

    #[test]
    fn wire_names() {
        let saved = serde_json::to_value(StateEvent::StateSaved {
            view: "discovery".into(),
            size: 10,
            compression_ratio: 0.5,
            status: PersistStatus::PendingWrite,
        })
        .unwrap();
        assert_eq!(saved["type"], "view_state_saved");
        assert_eq!(saved["status"], "pending_write");

        let transition = serde_json::to_value(StateEvent::ViewTransition {
            from: None,
            to: "settings".into(),
        })
        .unwrap();
        assert_eq!(transition["type"], "view_transition");
        assert_eq!(transition["from"], serde_json::Value::Null);
    }
}
