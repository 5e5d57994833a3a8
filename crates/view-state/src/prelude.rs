//! Convenience re-exports for common `view-state` types.
//!
//! ```
//! use view_state::prelude::*;
//! ```
//!
//! Codec, cache and history internals are left out; import those from their
//! modules when needed.

// ── Manager ─────────────────────────────────────────────────────────
pub use crate::manager::{
    CacheStats, CaptureState, HostEvent, PersistStatus, SaveOutcome, StateSummary,
    ViewStateManager, ViewStateManagerBuilder,
};

// ── Configuration and data ──────────────────────────────────────────
pub use crate::config::ManagerConfig;
pub use crate::envelope::{CURRENT_VERSION, SchemaVersion, ViewState};

// ── Schemas and migrations ──────────────────────────────────────────
pub use crate::migration::{MigrationEngine, MigrationStep};
pub use crate::schema::{FieldKind, SchemaValidator, ViewSchema};

// ── Storage ─────────────────────────────────────────────────────────
pub use crate::store::{FileStore, MemoryStore, PersistentStore};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    BroadcastHandler, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler, StateEvent,
};
