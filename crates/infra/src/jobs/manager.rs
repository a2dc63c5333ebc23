//! Entity managers for executable, dead-letter, and history jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use procflow_core::{EngineError, EngineResult};

use super::{DeadLetterJobEntity, HistoryJobEntity, JobEntity};
use crate::persistence::{EntityManager, ManagerCache, ManagerScope, Session};
use crate::services::EngineServices;
use crate::store::{Direction, Filter, OrderBy, Pagination, QueryParams};

#[derive(Debug, Clone)]
pub struct JobEntityManager {
    default_retries: u32,
}

impl JobEntityManager {
    /// A new job with the engine's default retries.
    pub fn new_job(&self, handler_type: impl Into<String>) -> JobEntity {
        JobEntity::new(handler_type).with_retries(self.default_retries)
    }
}

impl EntityManager for JobEntityManager {
    type Entity = JobEntity;

    fn create(services: &EngineServices) -> Self {
        Self {
            default_retries: services.config.default_job_retries,
        }
    }

    fn slot(cache: &mut ManagerCache) -> &mut Option<Arc<Self>> {
        &mut cache.jobs
    }

    fn validate_insert(&self, _session: &Session, job: &JobEntity) -> EngineResult<()> {
        if job.handler_type.trim().is_empty() {
            return Err(EngineError::illegal_argument("job handler type is empty"));
        }
        Ok(())
    }
}

impl ManagerScope<'_, JobEntityManager> {
    /// Due jobs that are unlocked or whose lock has expired, oldest due first.
    pub fn find_acquirable(&self, now: DateTime<Utc>, max: usize) -> EngineResult<Vec<JobEntity>> {
        let now = now.to_rfc3339();
        let params = QueryParams {
            filters: vec![
                Filter::any_of([Filter::is_null("due_date"), Filter::less_or_equal("due_date", now.clone())]),
                Filter::any_of([
                    Filter::is_null("lock_expiration_time"),
                    Filter::less_or_equal("lock_expiration_time", now),
                ]),
            ],
            order_by: vec![
                OrderBy {
                    field: "due_date".into(),
                    direction: Direction::Asc,
                },
                OrderBy {
                    field: "created_at".into(),
                    direction: Direction::Asc,
                },
            ],
            page: Some(Pagination::new(0, max)),
            ..QueryParams::default()
        };
        self.list(&params)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadLetterJobEntityManager;

impl EntityManager for DeadLetterJobEntityManager {
    type Entity = DeadLetterJobEntity;

    fn create(_services: &EngineServices) -> Self {
        Self
    }

    fn slot(cache: &mut ManagerCache) -> &mut Option<Arc<Self>> {
        &mut cache.dead_letter_jobs
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryJobEntityManager;

impl EntityManager for HistoryJobEntityManager {
    type Entity = HistoryJobEntity;

    fn create(_services: &EngineServices) -> Self {
        Self
    }

    fn slot(cache: &mut ManagerCache) -> &mut Option<Arc<Self>> {
        &mut cache.history_jobs
    }
}
