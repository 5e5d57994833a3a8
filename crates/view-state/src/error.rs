//! Error types for the codec, store, and migration layers.
//!
//! None of these escape the [`ViewStateManager`](crate::manager::ViewStateManager)
//! boundary: the manager logs them and converts them into a
//! [`SaveOutcome`](crate::manager::SaveOutcome), a `None` result, or a
//! [`StateEvent`](crate::events::StateEvent).

use thiserror::Error;

/// Failures raised by a [`PersistentStore`](crate::store::PersistentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would push the store past its quota.
    #[error("storage capacity exceeded: {requested} bytes requested, quota is {quota} bytes")]
    CapacityExceeded { requested: usize, quota: usize },
    /// Underlying I/O failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backend cannot be used (poisoned lock, missing directory, ...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised inside the engine.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state did not match the view's declared schema.
    #[error("state for view '{view}' rejected: {}", .violations.join("; "))]
    ValidationRejected {
        view: String,
        violations: Vec<String>,
    },
    /// A compressed payload could not be decoded.
    #[error("corrupt state payload: {0}")]
    CorruptState(String),
    /// The durable store is full.
    #[error("storage capacity exceeded: {requested} bytes requested, quota is {quota} bytes")]
    CapacityExceeded { requested: usize, quota: usize },
    /// No transform chain leads from the stored version to the current one.
    #[error("no migration path from version {from} to {to}")]
    MigrationUnavailable { from: String, to: String },
    /// Any other store failure.
    #[error(transparent)]
    Store(StoreError),
    /// JSON encode/decode failure outside of a compressed payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for StateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CapacityExceeded { requested, quota } => {
                StateError::CapacityExceeded { requested, quota }
            }
            other => StateError::Store(other),
        }
    }
}

impl StateError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, StateError::CapacityExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_error_keeps_its_kind_through_conversion() {
        let err: StateError = StoreError::CapacityExceeded {
            requested: 10,
            quota: 5,
        }
        .into();
        assert!(err.is_capacity_exceeded());
        assert!(err.to_string().contains("quota is 5"));
    }

    #[test]
    fn other_store_errors_are_wrapped() {
        let err: StateError = StoreError::Unavailable("lock poisoned".into()).into();
        assert!(matches!(err, StateError::Store(_)));
        assert_eq!(err.to_string(), "storage unavailable: lock poisoned");
    }
}
