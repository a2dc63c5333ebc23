use std::sync::Arc;

use thiserror::Error;

use procflow_core::{EngineError, EntityId, EntityKind};

use super::query::QueryParams;
use crate::persistence::Record;

/// A single mutation applied by [`BackingStore::apply`].
///
/// The record carries the revision the caller last observed; the store
/// compares it against its own before touching the row.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOperation {
    Insert(Record),
    Update(Record),
    Delete(Record),
}

impl StoreOperation {
    pub fn record(&self) -> &Record {
        match self {
            StoreOperation::Insert(r) | StoreOperation::Update(r) | StoreOperation::Delete(r) => r,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.record().kind()
    }
}

/// Backing store operation error.
///
/// These are **infrastructure errors**; they reach callers as [`EngineError`]
/// through the `From` conversion below.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Stale revision on update/delete, or the row vanished underneath us.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The identifier is live or was used by a row that has since been removed.
    #[error("duplicate identifier: {kind} '{id}'")]
    DuplicateId { kind: EntityKind, id: EntityId },

    /// Insert of a child whose parent is missing, or delete of a parent that
    /// still has children.
    #[error("referential integrity violation: {0}")]
    ForeignKey(String),

    #[error("unknown query '{0}'")]
    UnknownQuery(String),

    #[error("record could not be (de)serialized: {0}")]
    Serialization(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Concurrency(msg) => EngineError::Concurrency(msg),
            StoreError::DuplicateId { .. } => EngineError::IllegalArgument(err.to_string()),
            other => EngineError::Store(other.to_string()),
        }
    }
}

/// Keyed-query persistence boundary beneath the session.
///
/// The engine makes no assumption about the query language: queries are
/// addressed by opaque identifiers with a [`QueryParams`] mapping. The only
/// hard contract is on [`apply`](Self::apply):
///
/// - operations are applied atomically (all or nothing)
/// - update/delete compare the record's revision with the stored one and fail
///   with [`StoreError::Concurrency`] on mismatch
/// - insert assigns revision `1`, update increments the revision
/// - identifiers are never reused, even after delete
pub trait BackingStore: Send + Sync {
    fn find_by_id(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>, StoreError>;

    /// Rows matching the query, ordered and paged per `params`.
    fn select_list(&self, query_id: &str, params: &QueryParams) -> Result<Vec<Record>, StoreError>;

    fn select_count(&self, query_id: &str, params: &QueryParams) -> Result<usize, StoreError>;

    /// Evaluate the query's predicate against a single (possibly unflushed) record.
    ///
    /// Returns `false` when the record is of a different kind than the query targets.
    fn matches(&self, query_id: &str, params: &QueryParams, record: &Record) -> Result<bool, StoreError>;

    fn apply(&self, operations: &[StoreOperation]) -> Result<(), StoreError>;

    /// First row of the query, if any. Callers that need the "at most one"
    /// check go through the session.
    fn select_one(&self, query_id: &str, params: &QueryParams) -> Result<Option<Record>, StoreError> {
        Ok(self.select_list(query_id, params)?.into_iter().next())
    }
}

impl<S> BackingStore for Arc<S>
where
    S: BackingStore + ?Sized,
{
    fn find_by_id(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>, StoreError> {
        (**self).find_by_id(kind, id)
    }

    fn select_list(&self, query_id: &str, params: &QueryParams) -> Result<Vec<Record>, StoreError> {
        (**self).select_list(query_id, params)
    }

    fn select_count(&self, query_id: &str, params: &QueryParams) -> Result<usize, StoreError> {
        (**self).select_count(query_id, params)
    }

    fn matches(&self, query_id: &str, params: &QueryParams, record: &Record) -> Result<bool, StoreError> {
        (**self).matches(query_id, params, record)
    }

    fn apply(&self, operations: &[StoreOperation]) -> Result<(), StoreError> {
        (**self).apply(operations)
    }
}
