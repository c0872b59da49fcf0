//! Error taxonomy of the engine boundary.

use thiserror::Error;

use slotwise_core::DomainError;

use crate::store::StoreError;

/// Failure of an engine operation.
///
/// "No candidate bin" and "line only partially satisfiable" are ordinary
/// results, not errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A referenced item, bin or movement does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request itself is malformed (zero quantity, bad bin choice, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A precondition read earlier is stale (version, capacity or stock moved).
    /// Re-run the find/plan step and commit again.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store could not durably commit. State is unchanged.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The store's transaction deadline expired. State is unchanged.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl EngineError {
    /// Whether re-running find-then-commit may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg)
            | StoreError::InsufficientCapacity(msg)
            | StoreError::InsufficientStock(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            StoreError::InvalidTransition(msg) => EngineError::Validation(msg),
            StoreError::Timeout(msg) => EngineError::Timeout(msg),
            StoreError::Backend(msg) => EngineError::Persistence(msg),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::NotFound(msg) => EngineError::NotFound(msg),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict: EngineError = StoreError::InsufficientStock("B1".into()).into();
        assert!(conflict.is_retryable());

        for err in [
            EngineError::from(StoreError::Backend("disk".into())),
            EngineError::from(StoreError::Timeout("lock".into())),
            EngineError::from(DomainError::not_found("item")),
            EngineError::from(DomainError::validation("qty")),
        ] {
            assert!(!err.is_retryable(), "{err}");
        }
    }

    #[test]
    fn store_errors_keep_their_message() {
        let err: EngineError = StoreError::Concurrency("bin B1 is at version 3".into()).into();
        assert_eq!(err, EngineError::Conflict("bin B1 is at version 3".into()));
    }
}
