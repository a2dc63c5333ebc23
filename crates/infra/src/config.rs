//! Engine configuration.
//!
//! Plain structs with `Default` values; `from_env` layers `PROCFLOW_*`
//! environment overrides on top. Unparsable values fall back to the default.

use std::time::Duration;

use tracing::warn;

use crate::jobs::RetryPolicy;

/// Async job executor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecutorConfig {
    /// Name for logging and the worker thread.
    pub name: String,
    /// Lock owner written on claimed jobs.
    pub lock_owner: String,
    /// How long a claim stays valid before another worker may take the job over.
    pub lock_duration: Duration,
    /// How often to poll for due jobs when idle.
    pub poll_interval: Duration,
    /// Maximum jobs acquired per poll.
    pub max_jobs_per_acquisition: usize,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            name: "job-executor".to_string(),
            lock_owner: format!("job-executor-{}", uuid::Uuid::now_v7()),
            lock_duration: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(100),
            max_jobs_per_acquisition: 1,
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_jobs_per_acquisition(mut self, max: usize) -> Self {
        self.max_jobs_per_acquisition = max.max(1);
        self
    }
}

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Total attempts (first run included) for a command that hits an
    /// optimistic-lock conflict.
    pub command_retry_attempts: u32,
    /// Initial state of the event dispatcher.
    pub event_dispatcher_enabled: bool,
    /// Keep a history row for every successfully executed job.
    pub archive_completed_jobs: bool,
    /// Retries given to newly created jobs.
    pub default_job_retries: u32,
    /// Next due date of a failed job.
    pub job_retry_policy: RetryPolicy,
    pub async_executor: JobExecutorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_retry_attempts: 3,
            event_dispatcher_enabled: true,
            archive_completed_jobs: false,
            default_job_retries: 3,
            job_retry_policy: RetryPolicy::default(),
            async_executor: JobExecutorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PROCFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `PROCFLOW_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "PROCFLOW_COMMAND_RETRY_ATTEMPTS") {
            config.command_retry_attempts = v;
        }
        if let Some(v) = parse(&lookup, "PROCFLOW_EVENTS_ENABLED") {
            config.event_dispatcher_enabled = v;
        }
        if let Some(v) = parse(&lookup, "PROCFLOW_ARCHIVE_COMPLETED_JOBS") {
            config.archive_completed_jobs = v;
        }
        if let Some(v) = parse(&lookup, "PROCFLOW_DEFAULT_JOB_RETRIES") {
            config.default_job_retries = v;
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "PROCFLOW_LOCK_DURATION_SECS") {
            config.async_executor.lock_duration = Duration::from_secs(secs);
        }

        config
    }

    pub fn with_command_retry_attempts(mut self, attempts: u32) -> Self {
        self.command_retry_attempts = attempts.max(1);
        self
    }

    pub fn with_event_dispatcher_enabled(mut self, enabled: bool) -> Self {
        self.event_dispatcher_enabled = enabled;
        self
    }

    pub fn with_archive_completed_jobs(mut self, archive: bool) -> Self {
        self.archive_completed_jobs = archive;
        self
    }

    pub fn with_default_job_retries(mut self, retries: u32) -> Self {
        self.default_job_retries = retries;
        self
    }

    pub fn with_job_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.job_retry_policy = policy;
        self
    }

    pub fn with_async_executor(mut self, executor: JobExecutorConfig) -> Self {
        self.async_executor = executor;
        self
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
