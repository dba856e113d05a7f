//! Error types shared across the engine crates.

use crate::storage::StorageError;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error for statement handling.
///
/// Per-statement failures abort that statement only: the in-memory
/// transaction is rolled back and no log events are emitted.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The statement could not be classified or the engine rejected its syntax.
    #[error("parse error: {0}")]
    Parse(String),

    /// Replaying `schema_log` against the session failed.
    #[error("schema replay failed: {0}")]
    SchemaReplay(String),

    /// A storage read/write/list failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The analytical engine reported an execution failure.
    #[error("query error: {0}")]
    Engine(String),

    /// A requested endpoint or table does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An engine invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True when the error maps to a precondition-failed storage write.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(StorageError::PreconditionFailed { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_converts() {
        let err: EngineError = StorageError::NotFound("t/data/x.parquet".into()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_precondition_failed());
    }

    #[test]
    fn precondition_is_detectable() {
        let err: EngineError = StorageError::PreconditionFailed {
            path: "t/HEAD".into(),
            current: "abc".into(),
        }
        .into();
        assert!(err.is_precondition_failed());
    }
}
