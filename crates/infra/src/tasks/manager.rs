//! Entity managers for tasks and their attachments.

use std::sync::Arc;

use procflow_core::{EngineError, EngineResult, EntityId, EntityKind};

use super::{AttachmentEntity, TaskEntity};
use crate::persistence::{EntityManager, ManagerCache, ManagerScope, Session};
use crate::services::EngineServices;
use crate::store::{Filter, QueryParams};

#[derive(Debug, Clone, Default)]
pub struct TaskEntityManager;

impl EntityManager for TaskEntityManager {
    type Entity = TaskEntity;

    fn create(_services: &EngineServices) -> Self {
        Self
    }

    fn slot(cache: &mut ManagerCache) -> &mut Option<Arc<Self>> {
        &mut cache.tasks
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttachmentEntityManager;

impl EntityManager for AttachmentEntityManager {
    type Entity = AttachmentEntity;

    fn create(_services: &EngineServices) -> Self {
        Self
    }

    fn slot(cache: &mut ManagerCache) -> &mut Option<Arc<Self>> {
        &mut cache.attachments
    }

    /// The parent task must exist, committed or staged in this session.
    fn validate_insert(&self, session: &Session, attachment: &AttachmentEntity) -> EngineResult<()> {
        match session.find_by_id(EntityKind::Task, &attachment.task_id)? {
            Some(_) => Ok(()),
            None => Err(EngineError::not_found(EntityKind::Task, attachment.task_id.as_str())),
        }
    }
}

impl ManagerScope<'_, AttachmentEntityManager> {
    pub fn find_by_task(&self, task_id: &EntityId) -> EngineResult<Vec<AttachmentEntity>> {
        self.list(&QueryParams::new().with_filter(Filter::equals("task_id", task_id.as_str())))
    }
}
