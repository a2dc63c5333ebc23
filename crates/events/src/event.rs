use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use procflow_core::{Entity, EntityId, EntityKind};

/// Lifecycle event types raised by the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEventType {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    /// A job (or archived job) was explicitly deleted before completing.
    JobCanceled,
    JobExecutionSuccess,
    JobExecutionFailure,
    JobRetriesDecremented,
    JobMovedToDeadLetter,
}

impl EngineEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineEventType::EntityCreated => "ENTITY_CREATED",
            EngineEventType::EntityUpdated => "ENTITY_UPDATED",
            EngineEventType::EntityDeleted => "ENTITY_DELETED",
            EngineEventType::JobCanceled => "JOB_CANCELED",
            EngineEventType::JobExecutionSuccess => "JOB_EXECUTION_SUCCESS",
            EngineEventType::JobExecutionFailure => "JOB_EXECUTION_FAILURE",
            EngineEventType::JobRetriesDecremented => "JOB_RETRIES_DECREMENTED",
            EngineEventType::JobMovedToDeadLetter => "JOB_MOVED_TO_DEADLETTER",
        }
    }
}

impl core::fmt::Display for EngineEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity an event is about, captured at the moment the event was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubject {
    pub kind: EntityKind,
    pub id: EntityId,
    /// Serialized state of the entity when the event was raised.
    pub snapshot: JsonValue,
}

/// Immutable lifecycle event: `{type, subject entity, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    event_type: EngineEventType,
    subject: EventSubject,
    timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(event_type: EngineEventType, subject: EventSubject, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            subject,
            timestamp,
        }
    }

    /// Build an event about `entity`, timestamped now.
    ///
    /// An entity that fails to serialize is captured with a `null` snapshot; the
    /// kind and id are always present.
    pub fn for_entity<E>(event_type: EngineEventType, entity: &E) -> Self
    where
        E: Entity + Serialize,
    {
        let snapshot = serde_json::to_value(entity).unwrap_or(JsonValue::Null);
        Self::new(
            event_type,
            EventSubject {
                kind: E::KIND,
                id: entity.id().clone(),
                snapshot,
            },
            Utc::now(),
        )
    }

    pub fn event_type(&self) -> EngineEventType {
        self.event_type
    }

    pub fn subject(&self) -> &EventSubject {
        &self.subject
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.subject.kind
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.subject.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
