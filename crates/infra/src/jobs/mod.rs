//! Asynchronous work items ("jobs"): creation, locking, execution, retry
//! with backoff, dead-lettering, archival, and cancellation.
//!
//! ## Components
//!
//! - `JobEntity`, `DeadLetterJobEntity`, `HistoryJobEntity`: the three tables a
//!   job moves through
//! - `JobHandlerRegistry`: handler lookup by `handler_type`
//! - lifecycle commands (`CreateJobCmd`, `LockJobCmd`, `ExecuteJobCmd`, ...)
//! - `JobExecutor`: worker loop driving due jobs through those commands

pub mod commands;
pub mod executor;
pub mod handler;
pub mod manager;
pub mod types;

pub use commands::{
    AcquireJobsCmd, CreateJobCmd, DeleteDeadLetterJobCmd, DeleteHistoryJobCmd, DeleteJobCmd, ExecuteJobCmd,
    HandleJobFailureCmd, JobFailureOutcome, LockJobCmd, MoveDeadLetterJobToExecutableJobCmd,
};
pub use executor::{ExecutorStats, JobExecutor, JobExecutorHandle, JobRunOutcome};
pub use handler::{JobHandler, JobHandlerRegistry};
pub use manager::{DeadLetterJobEntityManager, HistoryJobEntityManager, JobEntityManager};
pub use types::{BackoffStrategy, DeadLetterJobEntity, HistoryJobEntity, JobEntity, JobState, RetryPolicy};
