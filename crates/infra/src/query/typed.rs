//! Entity-specific filters and sort keys on top of [`Query`].

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use procflow_core::{EngineError, EntityId};

use super::Query;
use crate::jobs::{DeadLetterJobEntityManager, HistoryJobEntityManager, JobEntityManager};
use crate::store::Filter;
use crate::tasks::{AttachmentEntityManager, TaskEntityManager};

pub type TaskQuery = Query<TaskEntityManager>;
pub type AttachmentQuery = Query<AttachmentEntityManager>;
pub type JobQuery = Query<JobEntityManager>;
pub type DeadLetterJobQuery = Query<DeadLetterJobEntityManager>;
pub type HistoryJobQuery = Query<HistoryJobEntityManager>;

fn timestamp(at: DateTime<Utc>) -> JsonValue {
    JsonValue::String(at.to_rfc3339())
}

impl<M: crate::persistence::EntityManager> Query<M> {
    /// Equality filter on a required string argument; blank values are rejected.
    fn equals_str(self, field: &str, value: &str) -> Self {
        if value.trim().is_empty() {
            return self.fail(EngineError::illegal_argument(format!("{field} is null or empty")));
        }
        self.filter(Filter::equals(field, value))
    }

    fn equals_id(self, field: &str, id: &EntityId) -> Self {
        self.filter(Filter::equals(field, id.as_str()))
    }
}

impl TaskQuery {
    pub fn task_id(self, id: &EntityId) -> Self {
        self.equals_id("id", id)
    }

    pub fn task_name(self, name: &str) -> Self {
        self.equals_str("name", name)
    }

    /// `%` matches any run of characters.
    pub fn task_name_like(self, pattern: &str) -> Self {
        if pattern.is_empty() {
            return self.fail(EngineError::illegal_argument("name pattern is empty"));
        }
        self.filter(Filter::like("name", pattern))
    }

    pub fn task_owner(self, owner: &str) -> Self {
        self.equals_str("owner", owner)
    }

    pub fn task_assignee(self, assignee: &str) -> Self {
        self.equals_str("assignee", assignee)
    }

    pub fn unowned(self) -> Self {
        self.filter(Filter::is_null("owner"))
    }

    pub fn priority(self, priority: i32) -> Self {
        self.filter(Filter::equals("priority", priority))
    }

    pub fn min_priority(self, priority: i32) -> Self {
        self.filter(Filter::greater_or_equal("priority", priority))
    }

    pub fn max_priority(self, priority: i32) -> Self {
        self.filter(Filter::less_or_equal("priority", priority))
    }

    pub fn order_by_task_priority(self) -> Self {
        self.order_by("priority")
    }

    pub fn order_by_task_name(self) -> Self {
        self.order_by("name")
    }

    pub fn order_by_task_create_time(self) -> Self {
        self.order_by("created_at")
    }
}

impl AttachmentQuery {
    pub fn attachment_id(self, id: &EntityId) -> Self {
        self.equals_id("id", id)
    }

    pub fn attachment_name(self, name: &str) -> Self {
        self.equals_str("name", name)
    }

    pub fn attachment_type(self, attachment_type: &str) -> Self {
        self.equals_str("attachment_type", attachment_type)
    }

    pub fn task_id(self, task_id: &EntityId) -> Self {
        self.equals_id("task_id", task_id)
    }

    pub fn user_id(self, user_id: &str) -> Self {
        self.equals_str("user_id", user_id)
    }

    pub fn order_by_attachment_name(self) -> Self {
        self.order_by("name")
    }

    pub fn order_by_attachment_time(self) -> Self {
        self.order_by("time")
    }
}

impl JobQuery {
    pub fn job_id(self, id: &EntityId) -> Self {
        self.equals_id("id", id)
    }

    pub fn handler_type(self, handler_type: &str) -> Self {
        self.equals_str("handler_type", handler_type)
    }

    pub fn process_instance_id(self, id: &str) -> Self {
        self.equals_str("process_instance_id", id)
    }

    pub fn execution_id(self, id: &str) -> Self {
        self.equals_str("execution_id", id)
    }

    /// Due at or before `now`; jobs without a due date are always executable.
    pub fn executable(self, now: DateTime<Utc>) -> Self {
        self.filter(Filter::any_of([
            Filter::is_null("due_date"),
            Filter::less_or_equal("due_date", timestamp(now)),
        ]))
    }

    pub fn due_before(self, at: DateTime<Utc>) -> Self {
        self.filter(Filter::less_than("due_date", timestamp(at)))
    }

    pub fn locked(self) -> Self {
        self.filter(Filter::is_not_null("lock_owner"))
    }

    pub fn unlocked(self) -> Self {
        self.filter(Filter::is_null("lock_owner"))
    }

    pub fn lock_owner(self, owner: &str) -> Self {
        self.equals_str("lock_owner", owner)
    }

    pub fn with_exception(self) -> Self {
        self.filter(Filter::is_not_null("exception_message"))
    }

    pub fn order_by_due_date(self) -> Self {
        self.order_by("due_date")
    }

    pub fn order_by_retries(self) -> Self {
        self.order_by("retries")
    }

    pub fn order_by_create_time(self) -> Self {
        self.order_by("created_at")
    }
}

impl DeadLetterJobQuery {
    pub fn dead_letter_job_id(self, id: &EntityId) -> Self {
        self.equals_id("id", id)
    }

    /// Id the job had while it was executable.
    pub fn job_id(self, job_id: &EntityId) -> Self {
        self.equals_id("job_id", job_id)
    }

    pub fn handler_type(self, handler_type: &str) -> Self {
        self.equals_str("handler_type", handler_type)
    }

    pub fn process_instance_id(self, id: &str) -> Self {
        self.equals_str("process_instance_id", id)
    }

    pub fn order_by_dead_lettered_time(self) -> Self {
        self.order_by("dead_lettered_at")
    }
}

impl HistoryJobQuery {
    pub fn history_job_id(self, id: &EntityId) -> Self {
        self.equals_id("id", id)
    }

    pub fn job_id(self, job_id: &EntityId) -> Self {
        self.equals_id("job_id", job_id)
    }

    pub fn handler_type(self, handler_type: &str) -> Self {
        self.equals_str("handler_type", handler_type)
    }

    pub fn completed_before(self, at: DateTime<Utc>) -> Self {
        self.filter(Filter::less_than("completed_at", timestamp(at)))
    }

    pub fn order_by_completed_time(self) -> Self {
        self.order_by("completed_at")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command_executor::CommandExecutor;
    use crate::config::EngineConfig;
    use crate::services::EngineServices;
    use crate::store::InMemoryStore;
    use crate::tasks::{CreateAttachmentCmd, SaveTaskCmd, TaskEntity, AttachmentEntity};

    fn executor() -> Arc<CommandExecutor> {
        let services = EngineServices::new(EngineConfig::default(), Arc::new(InMemoryStore::new()));
        Arc::new(CommandExecutor::new(services))
    }

    fn save(executor: &CommandExecutor, task: TaskEntity) -> TaskEntity {
        executor.execute(&SaveTaskCmd { task }).unwrap()
    }

    #[test]
    fn task_filters_combine() {
        let executor = executor();
        save(&executor, TaskEntity::new().with_name("invoice review").with_owner("kermit").with_priority(10));
        save(&executor, TaskEntity::new().with_name("invoice approval").with_priority(70));
        save(&executor, TaskEntity::new().with_name("contract review").with_priority(90));

        let names = |query: TaskQuery| -> Vec<String> {
            query.list().unwrap().into_iter().filter_map(|t| t.name).collect()
        };

        assert_eq!(
            names(TaskQuery::new(executor.clone()).task_name_like("invoice%").order_by_task_priority().desc()),
            vec!["invoice approval", "invoice review"]
        );
        assert_eq!(names(TaskQuery::new(executor.clone()).unowned().min_priority(80)), vec!["contract review"]);
        assert_eq!(TaskQuery::new(executor.clone()).task_owner("kermit").count().unwrap(), 1);
        assert_eq!(TaskQuery::new(executor).max_priority(70).count().unwrap(), 2);
    }

    #[test]
    fn blank_string_filter_is_illegal_argument() {
        let query = TaskQuery::new(executor()).task_owner("  ");
        assert!(matches!(query.list(), Err(EngineError::IllegalArgument(_))));
    }

    #[test]
    fn attachments_by_task() {
        let executor = executor();
        let first = save(&executor, TaskEntity::new());
        let second = save(&executor, TaskEntity::new());
        for (task, name) in [(&first, "a"), (&first, "b"), (&second, "c")] {
            executor
                .execute(&CreateAttachmentCmd {
                    attachment: AttachmentEntity::new(task.id.clone()).with_name(name).with_type("url"),
                })
                .unwrap();
        }

        let found = AttachmentQuery::new(executor.clone())
            .task_id(&first.id)
            .order_by_attachment_name()
            .desc()
            .list()
            .unwrap();
        let names: Vec<_> = found.into_iter().filter_map(|a| a.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(AttachmentQuery::new(executor).attachment_type("url").count().unwrap(), 3);
    }
}
