//! Seams to the host application: state capture and inbound events.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ViewStateManager;
use crate::envelope::ViewState;

/// Snapshots a view's live state on demand.
///
/// Implemented for any `Fn(&str) -> Option<ViewState>`, so a closure
/// over the host's UI model is enough.
pub trait CaptureState: Send + Sync {
    fn capture(&self, view: &str) -> Option<ViewState>;
}

impl<F> CaptureState for F
where
    F: Fn(&str) -> Option<ViewState> + Send + Sync,
{
    fn capture(&self, view: &str) -> Option<ViewState> {
        self(view)
    }
}

/// Requests the host sends to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The user navigated to another view.
    ViewChanged(String),
    /// Some other component replaced a view's state.
    UpdateState {
        view: String,
        state: ViewState,
        immediate: bool,
    },
}

impl ViewStateManager {
    pub fn handle_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::ViewChanged(view) => self.on_view_changed(&view),
            HostEvent::UpdateState {
                view,
                state,
                immediate,
            } => {
                self.apply_external_update(&view, state, immediate);
            }
        }
    }

    /// Consume host events on a background task until every sender is
    /// dropped. The task keeps a clone of the manager alive meanwhile.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_listener(&self, mut rx: mpsc::Receiver<HostEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                manager.handle_host_event(event);
            }
            debug!("host event channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn listener_applies_events_in_order() {
        let manager = ViewStateManager::new(Arc::new(MemoryStore::new()));
        let (tx, rx) = mpsc::channel(8);
        let task = manager.spawn_listener(rx);

        let state = json!({"theme": "dark"}).as_object().cloned().unwrap();
        tx.send(HostEvent::ViewChanged("discovery".into())).await.unwrap();
        tx.send(HostEvent::UpdateState {
            view: "settings".into(),
            state: state.clone(),
            immediate: true,
        })
        .await
        .unwrap();
        tx.send(HostEvent::ViewChanged("settings".into())).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(manager.active_view().as_deref(), Some("settings"));
        assert_eq!(manager.load_state("settings"), Some(state));
    }

    #[test]
    fn closures_capture_state() {
        let capture = |view: &str| {
            (view == "discovery").then(|| json!({"scrollPosition": 5}).as_object().cloned().unwrap())
        };
        assert!(CaptureState::capture(&capture, "discovery").is_some());
        assert!(CaptureState::capture(&capture, "settings").is_none());
    }
}
