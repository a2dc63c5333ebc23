//! Type-erased persistent row.

use serde::Serialize;
use serde_json::Value as JsonValue;

use procflow_core::{Entity, EntityId, EntityKind};

use crate::jobs::{DeadLetterJobEntity, HistoryJobEntity, JobEntity};
use crate::store::StoreError;
use crate::tasks::{AttachmentEntity, TaskEntity};

/// One row of any entity kind, as exchanged with the backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Task(TaskEntity),
    Attachment(AttachmentEntity),
    Job(JobEntity),
    DeadLetterJob(DeadLetterJobEntity),
    HistoryJob(HistoryJobEntity),
}

macro_rules! each_record {
    ($record:expr, $inner:ident => $body:expr) => {
        match $record {
            Record::Task($inner) => $body,
            Record::Attachment($inner) => $body,
            Record::Job($inner) => $body,
            Record::DeadLetterJob($inner) => $body,
            Record::HistoryJob($inner) => $body,
        }
    };
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Task(_) => EntityKind::Task,
            Record::Attachment(_) => EntityKind::Attachment,
            Record::Job(_) => EntityKind::Job,
            Record::DeadLetterJob(_) => EntityKind::DeadLetterJob,
            Record::HistoryJob(_) => EntityKind::HistoryJob,
        }
    }

    pub fn id(&self) -> &EntityId {
        each_record!(self, e => e.id())
    }

    pub fn revision(&self) -> u64 {
        each_record!(self, e => e.revision())
    }

    pub fn set_revision(&mut self, revision: u64) {
        each_record!(self, e => e.set_revision(revision))
    }

    /// Serialized form; query filters and ordering are evaluated on it.
    pub fn to_json(&self) -> Result<JsonValue, StoreError> {
        each_record!(self, e => serde_json::to_value(e))
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Parent row this record references, if any.
    pub fn parent(&self) -> Option<(EntityKind, &EntityId)> {
        match self {
            Record::Attachment(a) => Some((EntityKind::Task, &a.task_id)),
            _ => None,
        }
    }
}

/// An entity that can travel through the session as a [`Record`].
pub trait Persistent: Entity + Serialize {
    fn into_record(self) -> Record;

    /// `None` when the record is of a different kind.
    fn from_record(record: Record) -> Option<Self>;
}

macro_rules! impl_persistent {
    ($entity:ty, $variant:ident) => {
        impl Persistent for $entity {
            fn into_record(self) -> Record {
                Record::$variant(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$variant(e) => Some(e),
                    _ => None,
                }
            }
        }

        impl From<$entity> for Record {
            fn from(entity: $entity) -> Self {
                Record::$variant(entity)
            }
        }
    };
}

impl_persistent!(TaskEntity, Task);
impl_persistent!(AttachmentEntity, Attachment);
impl_persistent!(JobEntity, Job);
impl_persistent!(DeadLetterJobEntity, DeadLetterJob);
impl_persistent!(HistoryJobEntity, HistoryJob);
