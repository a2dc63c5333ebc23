//! Engine error model.

use thiserror::Error;

use crate::entity::EntityKind;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error surfaced to callers of the command executor.
///
/// Only [`EngineError::Concurrency`] is ever retried (by the retry interceptor);
/// every other variant propagates to the caller unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Bad caller input. Never retried.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The requested entity does not exist.
    #[error("no {kind} found with id '{id}'")]
    ObjectNotFound { kind: EntityKind, id: String },

    /// Optimistic-lock failure or lost claim race.
    #[error("optimistic locking failure: {0}")]
    Concurrency(String),

    /// A single-result query matched more than one row.
    #[error("query returned {0} results where at most one was expected")]
    TooManyResults(usize),

    /// An operation was attempted on a resource in the wrong state
    /// (e.g. a closed session).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The backing store failed for a reason other than a version conflict.
    #[error("store failure: {0}")]
    Store(String),

    /// A job handler reported a failure.
    #[error("job execution failed: {0}")]
    JobExecution(String),
}

impl EngineError {
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }
}
