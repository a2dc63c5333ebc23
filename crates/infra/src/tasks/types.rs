//! Task and attachment entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procflow_core::{Entity, EntityId, EntityKind};

/// A human task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub id: EntityId,
    #[serde(default)]
    pub revision: u64,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub assignee: Option<String>,
    pub priority: i32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskEntity {
    /// Default task priority.
    pub const DEFAULT_PRIORITY: i32 = 50;

    pub fn new() -> Self {
        Self {
            id: EntityId::generate(),
            revision: 0,
            name: None,
            owner: None,
            assignee: None,
            priority: Self::DEFAULT_PRIORITY,
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Default for TaskEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity for TaskEntity {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

/// A document or link attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentEntity {
    pub id: EntityId,
    #[serde(default)]
    pub revision: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub attachment_type: Option<String>,
    /// Parent task; must exist when the attachment is flushed.
    pub task_id: EntityId,
    pub process_instance_id: Option<String>,
    pub url: Option<String>,
    pub user_id: Option<String>,
    pub time: DateTime<Utc>,
}

impl AttachmentEntity {
    pub fn new(task_id: EntityId) -> Self {
        Self {
            id: EntityId::generate(),
            revision: 0,
            name: None,
            description: None,
            attachment_type: None,
            task_id,
            process_instance_id: None,
            url: None,
            user_id: None,
            time: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_type(mut self, attachment_type: impl Into<String>) -> Self {
        self.attachment_type = Some(attachment_type.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

impl Entity for AttachmentEntity {
    const KIND: EntityKind = EntityKind::Attachment;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}
