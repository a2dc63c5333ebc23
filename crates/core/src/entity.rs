//! Entity trait: identity + optimistic-lock revision.

use serde::{Deserialize, Serialize};

use crate::id::EntityId;

/// Persistent entity kinds known to the engine.
///
/// The declaration order is the flush dependency order: referenced (parent) kinds
/// come first. Inserts are written in this order, deletes in reverse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Attachment,
    Job,
    DeadLetterJob,
    HistoryJob,
}

impl EntityKind {
    /// All kinds, parents first.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Task,
        EntityKind::Attachment,
        EntityKind::Job,
        EntityKind::DeadLetterJob,
        EntityKind::HistoryJob,
    ];

    /// Position in the insert order (lower is flushed earlier).
    pub fn flush_rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Attachment => "attachment",
            EntityKind::Job => "job",
            EntityKind::DeadLetterJob => "dead letter job",
            EntityKind::HistoryJob => "history job",
        }
    }

    /// Identifier of the built-in criteria query for this kind.
    pub fn criteria_query_id(self) -> &'static str {
        match self {
            EntityKind::Task => "selectTaskByQueryCriteria",
            EntityKind::Attachment => "selectAttachmentByQueryCriteria",
            EntityKind::Job => "selectJobByQueryCriteria",
            EntityKind::DeadLetterJob => "selectDeadLetterJobByQueryCriteria",
            EntityKind::HistoryJob => "selectHistoryJobByQueryCriteria",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent entity: identity + revision.
///
/// A revision of `0` means "never flushed". The store assigns revision `1` on
/// insert and increments it on every successful update; a stale revision on
/// update or delete is a concurrency failure.
pub trait Entity: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Kind tag used for manager lookup and flush ordering.
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;

    fn revision(&self) -> u64;

    fn set_revision(&mut self, revision: u64);

    fn is_new(&self) -> bool {
        self.revision() == 0
    }
}
