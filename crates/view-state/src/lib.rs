//! View-state persistence and caching engine for multi-view applications.
//!
//! `view-state` keeps the working state of every view in an interactive
//! application (selections, filters, scroll position, open tabs) so that
//! moving between views never loses progress. States are validated against
//! a per-view shape, compressed, cached in memory under a byte budget, and
//! written to a durable key-value store as one versioned envelope. The
//! [`ViewStateManager`](manager::ViewStateManager) ties it together.
//!
//! # Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use view_state::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let store = Arc::new(FileStore::new("./state")?);
//!     let manager = ViewStateManager::builder(store)
//!         .with_config(ManagerConfig::default().with_debounce(Duration::from_millis(250)))
//!         .with_event_handler(LoggingHandler)
//!         .with_capture(|view: &str| -> Option<ViewState> {
//!             // Ask the UI for the outgoing view's live state.
//!             let _ = view;
//!             None
//!         })
//!         .build();
//!     manager.start_housekeeping();
//!
//!     let state = serde_json::json!({"selectedFiles": ["a.csv"], "scrollPosition": 120});
//!     manager.save_state("discovery", state.as_object().cloned().unwrap_or_default(), false);
//!     manager.on_view_changed("analysis");
//!
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Save, load, undo:** [`ViewStateManager`](manager::ViewStateManager).
//!   Every operation is infallible from the caller's side; failures become
//!   a [`SaveOutcome`](manager::SaveOutcome), a `None`, or an event.
//! - **Plug in storage:** implement [`PersistentStore`](store::PersistentStore),
//!   or use [`MemoryStore`](store::MemoryStore) / [`FileStore`](store::FileStore).
//! - **Declare view shapes:** [`ViewSchema`](schema::ViewSchema) and
//!   [`SchemaValidator`](schema::SchemaValidator).
//! - **Upgrade old data:** [`MigrationEngine`](migration::MigrationEngine).
//! - **Observe decisions:** implement [`EventHandler`](events::EventHandler),
//!   or subscribe through [`BroadcastHandler`](events::BroadcastHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`manager`] | Facade: debounced writes, active view, housekeeping, capacity recovery |
//! | [`cache`] | Byte-budgeted LRU of compressed states |
//! | [`history`] | Bounded per-view undo/redo |
//! | [`codec`] | Canonical JSON + zlib compression |
//! | [`schema`] | Shallow structural validation via JSON Schema |
//! | [`migration`] | Version-to-version envelope upgrades |
//! | [`store`] | Durable key-value backends |
//! | [`envelope`] | Persisted record format and versions |
//! | [`events`] | Notifications and handlers |
//! | [`config`] | Tunables with defaults |
//! | [`error`] | Error types |

pub mod cache;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod history;
pub mod manager;
pub mod migration;
pub mod prelude;
pub mod schema;
pub mod store;

pub use envelope::{CURRENT_VERSION, ViewState};
pub use error::{StateError, StoreError};
pub use manager::{SaveOutcome, ViewStateManager};
