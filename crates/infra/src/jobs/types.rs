//! Job entities, lifecycle state, and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use procflow_core::{EngineError, EngineResult, Entity, EntityId, EntityKind};

/// Lifecycle state of an asynchronous work item.
///
/// `Created → Locked → (ExecutedOk | FailedRetry → Locked | FailedExhausted)`,
/// and any non-terminal state may go to `Canceled` through an explicit delete.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Locked,
    ExecutedOk,
    FailedRetry,
    FailedExhausted,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::ExecutedOk | JobState::FailedExhausted | JobState::Canceled
        )
    }
}

/// Executable job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntity {
    pub id: EntityId,
    #[serde(default)]
    pub revision: u64,
    /// Routing tag for the [`JobHandler`](super::JobHandler) registry.
    pub handler_type: String,
    #[serde(default)]
    pub handler_config: JsonValue,
    /// Remaining attempts; the job is dead-lettered when this reaches zero.
    pub retries: u32,
    /// Earliest execution time; `None` means "as soon as possible".
    pub due_date: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub exception_message: Option<String>,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    #[serde(default)]
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl JobEntity {
    pub fn new(handler_type: impl Into<String>) -> Self {
        Self {
            id: EntityId::generate(),
            revision: 0,
            handler_type: handler_type.into(),
            handler_config: JsonValue::Null,
            retries: 3,
            due_date: None,
            lock_owner: None,
            lock_expiration_time: None,
            exception_message: None,
            process_instance_id: None,
            execution_id: None,
            failed_attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    pub fn with_handler_config(mut self, config: JsonValue) -> Self {
        self.handler_config = config;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
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

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date.is_none_or(|due| due <= now)
    }

    /// `true` while a lock is held and has not yet expired.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_owner.is_some() && self.lock_expiration_time.is_some_and(|exp| exp > now)
    }

    pub fn is_locked_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.is_locked_at(now) && self.lock_owner.as_deref() == Some(owner)
    }

    pub fn release_lock(&mut self) {
        self.lock_owner = None;
        self.lock_expiration_time = None;
    }

    /// State of a job row that still exists in the executable table.
    pub fn state(&self, now: DateTime<Utc>) -> JobState {
        if self.is_locked_at(now) {
            JobState::Locked
        } else if self.failed_attempts > 0 {
            JobState::FailedRetry
        } else {
            JobState::Created
        }
    }
}

impl Entity for JobEntity {
    const KIND: EntityKind = EntityKind::Job;

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

/// A job whose retries were exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterJobEntity {
    pub id: EntityId,
    #[serde(default)]
    pub revision: u64,
    /// Identifier of the executable job this row replaced.
    pub job_id: EntityId,
    pub handler_type: String,
    #[serde(default)]
    pub handler_config: JsonValue,
    pub exception_message: Option<String>,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterJobEntity {
    pub fn from_job(job: &JobEntity, now: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::generate(),
            revision: 0,
            job_id: job.id.clone(),
            handler_type: job.handler_type.clone(),
            handler_config: job.handler_config.clone(),
            exception_message: job.exception_message.clone(),
            process_instance_id: job.process_instance_id.clone(),
            execution_id: job.execution_id.clone(),
            failed_attempts: job.failed_attempts,
            created_at: job.created_at,
            dead_lettered_at: now,
        }
    }

    /// A fresh executable job carrying this row's payload. Identifiers are
    /// never reused, so the job gets a new one.
    pub fn to_executable(&self, retries: u32) -> JobEntity {
        JobEntity {
            handler_config: self.handler_config.clone(),
            retries,
            process_instance_id: self.process_instance_id.clone(),
            execution_id: self.execution_id.clone(),
            ..JobEntity::new(self.handler_type.clone())
        }
    }

    pub fn state(&self) -> JobState {
        JobState::FailedExhausted
    }
}

impl Entity for DeadLetterJobEntity {
    const KIND: EntityKind = EntityKind::DeadLetterJob;

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

/// Archived record of a successfully executed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryJobEntity {
    pub id: EntityId,
    #[serde(default)]
    pub revision: u64,
    pub job_id: EntityId,
    pub handler_type: String,
    #[serde(default)]
    pub handler_config: JsonValue,
    pub process_instance_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl HistoryJobEntity {
    pub fn from_job(job: &JobEntity, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::generate(),
            revision: 0,
            job_id: job.id.clone(),
            handler_type: job.handler_type.clone(),
            handler_config: job.handler_config.clone(),
            process_instance_id: job.process_instance_id.clone(),
            created_at: job.created_at,
            completed_at,
        }
    }

    pub fn state(&self) -> JobState {
        JobState::ExecutedOk
    }
}

impl Entity for HistoryJobEntity {
    const KIND: EntityKind = EntityKind::HistoryJob;

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

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Decides when a failed job becomes due again.
///
/// The number of attempts is governed by the job's own `retries` counter;
/// the policy only shapes the delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Failed jobs become due again immediately.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Create a policy with fixed delays.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    /// Delay before attempt number `attempt` (1-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => Some(self.base_delay),
            BackoffStrategy::Exponential => 2_u32
                .checked_pow(attempt - 1)
                .and_then(|factor| self.base_delay.checked_mul(factor)),
            BackoffStrategy::Linear => self.base_delay.checked_mul(attempt),
        };
        delay.map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Due date of the next attempt after `attempt` failures.
    pub fn next_due_date(&self, now: DateTime<Utc>, attempt: u32) -> EngineResult<DateTime<Utc>> {
        offset_by(now, self.delay_for_attempt(attempt))
    }
}

/// `now + duration`; `IllegalArgument` when the instant is out of range.
pub fn offset_by(now: DateTime<Utc>, duration: Duration) -> EngineResult<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| EngineError::illegal_argument(format!("{duration:?} after {now} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_is_capped() {
        let policy = RetryPolicy::linear(Duration::from_millis(100), Duration::from_millis(250));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn huge_delays_saturate_at_the_cap() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(3600));

        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(3600));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn out_of_range_due_date_is_rejected() {
        let policy = RetryPolicy::fixed(Duration::from_secs(u64::MAX));

        let err = policy.next_due_date(Utc::now(), 1).unwrap_err();
        assert!(matches!(err, EngineError::IllegalArgument(_)));

        let far = Duration::from_secs(100_000_000_000_000);
        assert!(offset_by(Utc::now(), far).is_err());
        assert!(offset_by(Utc::now(), Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn lock_expiry_releases_the_job() {
        let now = Utc::now();
        let mut job = JobEntity::new("noop");
        assert_eq!(job.state(now), JobState::Created);

        job.lock_owner = Some("worker-a".into());
        job.lock_expiration_time = Some(now + chrono::Duration::seconds(30));
        assert_eq!(job.state(now), JobState::Locked);
        assert!(job.is_locked_by("worker-a", now));
        assert!(!job.is_locked_by("worker-b", now));

        let later = now + chrono::Duration::seconds(31);
        assert!(!job.is_locked_at(later));
        assert_eq!(job.state(later), JobState::Created);
    }

    #[test]
    fn dead_letter_round_trip_uses_fresh_ids() {
        let mut job = JobEntity::new("mail").with_process_instance_id("pi-1");
        job.failed_attempts = 3;
        job.exception_message = Some("smtp down".into());

        let dead = DeadLetterJobEntity::from_job(&job, Utc::now());
        assert_eq!(dead.job_id, job.id);
        assert_ne!(dead.id, job.id);
        assert_eq!(dead.state(), JobState::FailedExhausted);

        let revived = dead.to_executable(2);
        assert_ne!(revived.id, job.id);
        assert_eq!(revived.retries, 2);
        assert_eq!(revived.handler_type, "mail");
        assert_eq!(revived.process_instance_id.as_deref(), Some("pi-1"));
    }
}
