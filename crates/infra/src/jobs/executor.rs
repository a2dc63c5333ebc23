//! Async job executor: acquire, lock, execute, and handle failures.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use procflow_core::{EngineError, EngineResult, EntityId};

use super::commands::{AcquireJobsCmd, ExecuteJobCmd, HandleJobFailureCmd, JobFailureOutcome, LockJobCmd};
use crate::command_executor::{CommandConfig, CommandExecutor};
use crate::config::JobExecutorConfig;

/// The job was reclaimed by another worker or deleted while this one held it.
fn lost_claim(err: &EngineError) -> bool {
    matches!(err, EngineError::Concurrency(_) | EngineError::ObjectNotFound { .. })
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    /// Claims lost to another worker.
    pub jobs_skipped: u64,
    pub uptime_secs: u64,
}

/// Result of one [`JobExecutor::run_job`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunOutcome {
    Succeeded,
    Failed(JobFailureOutcome),
    /// Another worker holds or completed the job.
    Skipped,
}

/// Drives due jobs through the command pipeline.
///
/// Each job goes through three units of work: the claim (never retried, so a
/// lost race surfaces as "already taken"), the execution, and on failure the
/// retry bookkeeping.
pub struct JobExecutor {
    commands: Arc<CommandExecutor>,
    config: JobExecutorConfig,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl core::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn new(commands: Arc<CommandExecutor>, config: JobExecutorConfig) -> Self {
        Self {
            commands,
            config,
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
        }
    }

    pub fn config(&self) -> &JobExecutorConfig {
        &self.config
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Lock, execute, and on failure reschedule or dead-letter one job.
    pub fn run_job(&self, job_id: &EntityId, now: DateTime<Utc>) -> EngineResult<JobRunOutcome> {
        let lock = LockJobCmd {
            job_id: job_id.clone(),
            owner: self.config.lock_owner.clone(),
            now,
            lock_duration: self.config.lock_duration,
        };
        match self.commands.execute_with(CommandConfig::no_retry(), &lock) {
            Ok(_) => {}
            Err(EngineError::Concurrency(msg)) => {
                debug!(executor = %self.config.name, job_id = %job_id, reason = %msg, "job already taken");
                self.record(|s| s.jobs_skipped += 1);
                return Ok(JobRunOutcome::Skipped);
            }
            Err(EngineError::ObjectNotFound { .. }) => {
                debug!(executor = %self.config.name, job_id = %job_id, "job vanished before it could be locked");
                self.record(|s| s.jobs_skipped += 1);
                return Ok(JobRunOutcome::Skipped);
            }
            Err(err) => return Err(err),
        }

        let execute = ExecuteJobCmd::new(job_id.clone(), self.config.lock_owner.clone()).at(now);
        let err = match self.commands.execute(&execute) {
            Ok(()) => {
                debug!(executor = %self.config.name, job_id = %job_id, "job executed");
                self.record(|s| {
                    s.jobs_processed += 1;
                    s.jobs_succeeded += 1;
                });
                return Ok(JobRunOutcome::Succeeded);
            }
            Err(err) if lost_claim(&err) => return Ok(self.skipped(job_id, &err)),
            Err(err) => err,
        };

        warn!(executor = %self.config.name, job_id = %job_id, error = %err, "job execution failed");
        let failure = HandleJobFailureCmd {
            job_id: job_id.clone(),
            owner: self.config.lock_owner.clone(),
            error: err.to_string(),
            now,
        };
        let outcome = match self.commands.execute(&failure) {
            Ok(outcome) => outcome,
            Err(err) if lost_claim(&err) => return Ok(self.skipped(job_id, &err)),
            Err(err) => return Err(err),
        };
        self.record(|s| {
            s.jobs_processed += 1;
            s.jobs_failed += 1;
            if matches!(outcome, JobFailureOutcome::DeadLettered { .. }) {
                s.jobs_dead_lettered += 1;
            }
        });
        Ok(JobRunOutcome::Failed(outcome))
    }

    fn skipped(&self, job_id: &EntityId, reason: &EngineError) -> JobRunOutcome {
        debug!(executor = %self.config.name, job_id = %job_id, reason = %reason, "job taken over or removed");
        self.record(|s| s.jobs_skipped += 1);
        JobRunOutcome::Skipped
    }

    /// One synchronous acquisition pass at the current time.
    pub fn execute_available(&self) -> EngineResult<Vec<(EntityId, JobRunOutcome)>> {
        self.execute_available_at(Utc::now())
    }

    /// One synchronous acquisition pass at `now`.
    pub fn execute_available_at(&self, now: DateTime<Utc>) -> EngineResult<Vec<(EntityId, JobRunOutcome)>> {
        let ids = self.commands.execute(&AcquireJobsCmd {
            now,
            max: self.config.max_jobs_per_acquisition,
        })?;

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.run_job(&id, now)?;
            outcomes.push((id, outcome));
        }
        Ok(outcomes)
    }

    fn record(&self, update: impl FnOnce(&mut ExecutorStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        update(&mut stats);
    }

    /// Spawn the executor in a background thread.
    pub fn spawn(self) -> std::io::Result<JobExecutorHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();
        let name = self.config.name.clone();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || executor_loop(self, shutdown_rx))?;

        Ok(JobExecutorHandle {
            name,
            stop: shutdown_tx,
            worker: Some(join),
            stats,
        })
    }
}

fn executor_loop(executor: JobExecutor, shutdown_rx: mpsc::Receiver<()>) {
    info!(executor = %executor.config.name, owner = %executor.config.lock_owner, "job executor started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        executor.record(|s| s.uptime_secs = start_time.elapsed().as_secs());

        match executor.execute_available() {
            Ok(outcomes) if !outcomes.is_empty() => {}
            Ok(_) => {
                // Idle: wait for the next poll, waking early on shutdown.
                if shutdown_rx.recv_timeout(executor.config.poll_interval).is_ok() {
                    break;
                }
            }
            Err(e) => {
                error!(executor = %executor.config.name, error = %e, "job acquisition pass failed");
                thread::sleep(executor.config.poll_interval);
            }
        }
    }

    info!(executor = %executor.config.name, "job executor stopped");
}

/// Controls a worker started by [`JobExecutor::spawn`].
#[derive(Debug)]
pub struct JobExecutorHandle {
    name: String,
    stop: mpsc::Sender<()>,
    worker: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` once the worker thread has exited.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop polling, let the in-flight pass finish, and return the final stats.
    pub fn shutdown(mut self) -> ExecutorStats {
        // A dropped sender stops the worker too, so a failed send is fine.
        let _ = self.stop.send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(executor = %self.name, "job executor thread panicked");
            }
        }
        self.stats()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
