//! Job lifecycle commands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use procflow_core::{EngineError, EngineResult, EntityId};
use procflow_events::EngineEventType;

use super::types::offset_by;
use super::{DeadLetterJobEntityManager, HistoryJobEntity, HistoryJobEntityManager, JobEntity, JobEntityManager};
use crate::command_executor::Command;
use crate::context::ExecutionContext;
use crate::persistence::EntityManager;

/// Insert a new executable job with the engine's default retries.
#[derive(Debug, Clone)]
pub struct CreateJobCmd {
    handler_type: String,
    handler_config: JsonValue,
    id: Option<EntityId>,
    due_date: Option<DateTime<Utc>>,
    process_instance_id: Option<String>,
    execution_id: Option<String>,
}

impl CreateJobCmd {
    pub fn new(handler_type: impl Into<String>) -> Self {
        Self {
            handler_type: handler_type.into(),
            handler_config: JsonValue::Null,
            id: None,
            due_date: None,
            process_instance_id: None,
            execution_id: None,
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_handler_config(mut self, config: JsonValue) -> Self {
        self.handler_config = config;
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }
}

impl Command for CreateJobCmd {
    /// The job as staged (revision 0).
    type Output = JobEntity;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<JobEntity> {
        let mut jobs = ctx.jobs();
        let mut job = jobs
            .manager()
            .new_job(self.handler_type.clone())
            .with_handler_config(self.handler_config.clone());
        if let Some(id) = &self.id {
            job.id = id.clone();
        }
        job.due_date = self.due_date;
        job.process_instance_id = self.process_instance_id.clone();
        job.execution_id = self.execution_id.clone();

        jobs.insert(job.clone())?;
        ctx.dispatch(EngineEventType::EntityCreated, &job);
        Ok(job)
    }
}

/// Ids of jobs a worker may claim at `now`. Read-only.
#[derive(Debug, Clone, Copy)]
pub struct AcquireJobsCmd {
    pub now: DateTime<Utc>,
    pub max: usize,
}

impl Command for AcquireJobsCmd {
    type Output = Vec<EntityId>;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<Vec<EntityId>> {
        Ok(ctx
            .jobs()
            .find_acquirable(self.now, self.max)?
            .into_iter()
            .map(|job| job.id)
            .collect())
    }
}

/// Claim a job for `owner` until `now + lock_duration`.
///
/// A single optimistically checked row update: of two workers racing for the
/// same job exactly one commits, the other gets [`EngineError::Concurrency`].
/// A job still locked by someone else, or no longer due, is also reported as
/// `Concurrency` so the caller treats it as taken.
#[derive(Debug, Clone)]
pub struct LockJobCmd {
    pub job_id: EntityId,
    pub owner: String,
    pub now: DateTime<Utc>,
    pub lock_duration: Duration,
}

impl Command for LockJobCmd {
    type Output = JobEntity;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<JobEntity> {
        let mut jobs = ctx.jobs();
        let mut job = jobs.get(&self.job_id)?;

        if job.is_locked_at(self.now) && job.lock_owner.as_deref() != Some(self.owner.as_str()) {
            return Err(EngineError::concurrency(format!(
                "job '{}' is locked by '{}'",
                job.id,
                job.lock_owner.as_deref().unwrap_or_default()
            )));
        }
        if !job.is_due(self.now) {
            return Err(EngineError::concurrency(format!("job '{}' is no longer due", job.id)));
        }

        job.lock_owner = Some(self.owner.clone());
        job.lock_expiration_time = Some(offset_by(self.now, self.lock_duration)?);
        jobs.update(job.clone())?;
        Ok(job)
    }
}

/// Run a locked job's handler and complete it.
///
/// On success the job row is deleted (archived to a history row when
/// configured) and `JOB_EXECUTION_SUCCESS` is dispatched. On failure nothing
/// is kept; the caller follows up with [`HandleJobFailureCmd`] in a fresh unit of work.
#[derive(Debug, Clone)]
pub struct ExecuteJobCmd {
    pub job_id: EntityId,
    pub owner: String,
    now: Option<DateTime<Utc>>,
}

impl ExecuteJobCmd {
    pub fn new(job_id: EntityId, owner: impl Into<String>) -> Self {
        Self {
            job_id,
            owner: owner.into(),
            now: None,
        }
    }

    /// Evaluate the lock at a fixed instant instead of the wall clock.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

impl Command for ExecuteJobCmd {
    type Output = ();

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<()> {
        let now = self.now.unwrap_or_else(Utc::now);
        let job = ctx.jobs().get(&self.job_id)?;
        if !job.is_locked_by(&self.owner, now) {
            return Err(EngineError::concurrency(format!(
                "job '{}' is not locked by '{}'",
                job.id, self.owner
            )));
        }

        let handler = ctx
            .services()
            .job_handlers
            .get(&job.handler_type)
            .ok_or_else(|| EngineError::JobExecution(format!("no handler registered for '{}'", job.handler_type)))?;

        handler.execute(&job, ctx).map_err(handler_error)?;

        if ctx.config().archive_completed_jobs {
            ctx.history_jobs().insert(HistoryJobEntity::from_job(&job, Utc::now()))?;
        }
        ctx.dispatch(EngineEventType::JobExecutionSuccess, &job);
        ctx.jobs().delete(job)
    }
}

/// Keep the classification of an [`EngineError`] raised inside a handler.
fn handler_error(err: anyhow::Error) -> EngineError {
    match err.downcast::<EngineError>() {
        Ok(engine) => engine,
        Err(other) => EngineError::JobExecution(format!("{other:#}")),
    }
}

/// What [`HandleJobFailureCmd`] did with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailureOutcome {
    /// Back in the executable table, due again at `due_date`.
    Rescheduled { retries_left: u32, due_date: DateTime<Utc> },
    /// Retries exhausted; moved to the dead-letter table.
    DeadLettered { dead_letter_job_id: EntityId },
}

/// Record a failed execution: decrement retries, release the lock, and
/// either reschedule by the retry policy or move the job to the dead-letter table.
///
/// Only the worker that ran the job may do this. A job whose lock has since
/// passed to another owner is left alone and reported as `Concurrency`.
#[derive(Debug, Clone)]
pub struct HandleJobFailureCmd {
    pub job_id: EntityId,
    pub owner: String,
    pub error: String,
    pub now: DateTime<Utc>,
}

impl Command for HandleJobFailureCmd {
    type Output = JobFailureOutcome;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<JobFailureOutcome> {
        let mut job = ctx.jobs().get(&self.job_id)?;
        if job.is_locked_at(self.now) && !job.is_locked_by(&self.owner, self.now) {
            return Err(EngineError::concurrency(format!(
                "job '{}' is now locked by '{}'",
                job.id,
                job.lock_owner.as_deref().unwrap_or_default()
            )));
        }
        job.retries = job.retries.saturating_sub(1);
        job.failed_attempts += 1;
        job.exception_message = Some(self.error.clone());
        job.release_lock();

        ctx.dispatch(EngineEventType::JobExecutionFailure, &job);
        ctx.dispatch(EngineEventType::JobRetriesDecremented, &job);

        if job.retries == 0 {
            let dead = super::DeadLetterJobEntity::from_job(&job, self.now);
            let dead_letter_job_id = dead.id.clone();
            warn!(
                job_id = %job.id,
                attempts = job.failed_attempts,
                error = %self.error,
                "job retries exhausted; moving to dead letter"
            );

            ctx.dispatch(EngineEventType::JobMovedToDeadLetter, &job);
            ctx.jobs().delete(job)?;
            ctx.dead_letter_jobs().insert(dead)?;
            return Ok(JobFailureOutcome::DeadLettered { dead_letter_job_id });
        }

        let due_date = ctx.config().job_retry_policy.next_due_date(self.now, job.failed_attempts)?;
        job.due_date = Some(due_date);
        let retries_left = job.retries;
        debug!(job_id = %job.id, retries_left, due_date = %due_date, "job rescheduled");
        ctx.jobs().update(job)?;
        Ok(JobFailureOutcome::Rescheduled { retries_left, due_date })
    }
}

/// Return a dead-letter job to the executable table with fresh retries.
#[derive(Debug, Clone)]
pub struct MoveDeadLetterJobToExecutableJobCmd {
    pub dead_letter_job_id: EntityId,
    pub retries: u32,
}

impl Command for MoveDeadLetterJobToExecutableJobCmd {
    /// The new executable job (identifiers are never reused, so it has a fresh one).
    type Output = JobEntity;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<JobEntity> {
        if self.retries == 0 {
            return Err(EngineError::illegal_argument("retries must be at least 1"));
        }

        let dead = ctx.dead_letter_jobs().get(&self.dead_letter_job_id)?;
        let job = dead.to_executable(self.retries);
        ctx.dead_letter_jobs().delete(dead)?;
        ctx.jobs().insert(job.clone())?;
        ctx.dispatch(EngineEventType::EntityCreated, &job);
        Ok(job)
    }
}

/// Shared body of the delete commands: validate the id, load the entity,
/// announce the cancellation while the row still exists, then stage the delete.
fn cancel_and_delete<M: EntityManager>(ctx: &mut ExecutionContext, raw_id: Option<&str>) -> EngineResult<()> {
    let kind = <M::Entity as procflow_core::Entity>::KIND;
    let raw_id = raw_id.ok_or_else(|| EngineError::illegal_argument(format!("{kind} id is null")))?;
    let id = EntityId::parse(raw_id)?;

    debug!(kind = %kind, id = %id, "deleting job");

    let entity = ctx.manager::<M>().get(&id)?;
    if ctx.event_dispatcher().is_enabled() {
        ctx.dispatch(EngineEventType::JobCanceled, &entity);
    }
    ctx.manager::<M>().delete(entity)
}

macro_rules! delete_command {
    ($(#[$doc:meta])* $name:ident, $manager:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            job_id: Option<String>,
        }

        impl $name {
            pub fn new(job_id: impl Into<String>) -> Self {
                Self {
                    job_id: Some(job_id.into()),
                }
            }

            /// Accepts a missing id; execution then fails with `IllegalArgument`.
            pub fn from_nullable(job_id: Option<String>) -> Self {
                Self { job_id }
            }
        }

        impl Command for $name {
            type Output = ();

            fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<()> {
                cancel_and_delete::<$manager>(ctx, self.job_id.as_deref())
            }
        }
    };
}

delete_command!(
    /// Cancel and delete an executable job.
    DeleteJobCmd,
    JobEntityManager
);

delete_command!(
    /// Cancel and delete an archived history job.
    DeleteHistoryJobCmd,
    HistoryJobEntityManager
);

delete_command!(
    /// Cancel and delete a dead-letter job.
    DeleteDeadLetterJobCmd,
    DeadLetterJobEntityManager
);
