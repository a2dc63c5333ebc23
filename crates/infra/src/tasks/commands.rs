//! Task and attachment commands.

use tracing::debug;

use procflow_core::{Entity, EngineResult, EntityId};
use procflow_events::EngineEventType;

use super::{AttachmentEntity, TaskEntity};
use crate::command_executor::Command;
use crate::context::ExecutionContext;

/// Insert a new task or update an existing one.
///
/// Returns the task as it will be stored once the command commits.
#[derive(Debug, Clone)]
pub struct SaveTaskCmd {
    pub task: TaskEntity,
}

impl Command for SaveTaskCmd {
    type Output = TaskEntity;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<TaskEntity> {
        let mut task = self.task.clone();
        if task.is_new() {
            ctx.tasks().insert(task.clone())?;
            ctx.dispatch(EngineEventType::EntityCreated, &task);
            task.set_revision(1);
        } else {
            // Surface a missing row as ObjectNotFound rather than a conflict.
            ctx.tasks().get(&task.id)?;
            ctx.tasks().update(task.clone())?;
            ctx.dispatch(EngineEventType::EntityUpdated, &task);
            task.set_revision(task.revision() + 1);
        }
        Ok(task)
    }
}

/// Delete a task together with its attachments.
#[derive(Debug, Clone)]
pub struct DeleteTaskCmd {
    pub task_id: EntityId,
}

impl Command for DeleteTaskCmd {
    type Output = ();

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<()> {
        let task = ctx.tasks().get(&self.task_id)?;
        let attachments = ctx.attachments().find_by_task(&task.id)?;
        debug!(task_id = %task.id, attachments = attachments.len(), "deleting task");

        // The task is staged first; the flush still removes the attachments before it.
        ctx.dispatch(EngineEventType::EntityDeleted, &task);
        ctx.tasks().delete(task)?;
        for attachment in attachments {
            ctx.dispatch(EngineEventType::EntityDeleted, &attachment);
            ctx.attachments().delete(attachment)?;
        }
        Ok(())
    }
}

/// Attach a document or link to an existing task.
#[derive(Debug, Clone)]
pub struct CreateAttachmentCmd {
    pub attachment: AttachmentEntity,
}

impl Command for CreateAttachmentCmd {
    type Output = AttachmentEntity;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<AttachmentEntity> {
        let mut attachment = self.attachment.clone();
        ctx.attachments().insert(attachment.clone())?;
        ctx.dispatch(EngineEventType::EntityCreated, &attachment);
        attachment.set_revision(1);
        Ok(attachment)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteAttachmentCmd {
    pub attachment_id: EntityId,
}

impl Command for DeleteAttachmentCmd {
    type Output = ();

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<()> {
        let attachment = ctx.attachments().get(&self.attachment_id)?;
        ctx.dispatch(EngineEventType::EntityDeleted, &attachment);
        ctx.attachments().delete(attachment)
    }
}
