//! Human tasks and their attachments.

pub mod commands;
pub mod manager;
pub mod types;

pub use commands::{CreateAttachmentCmd, DeleteAttachmentCmd, DeleteTaskCmd, SaveTaskCmd};
pub use manager::{AttachmentEntityManager, TaskEntityManager};
pub use types::{AttachmentEntity, TaskEntity};
