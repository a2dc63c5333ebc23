//! Entity managers: typed façades over the session, one per entity kind.
//!
//! Managers hold no entities. They are created lazily per context, cached for
//! its lifetime, and always used through a [`ManagerScope`] that pairs the
//! manager with the context's session.

use std::sync::Arc;

use procflow_core::{EngineError, EngineResult, EntityId, EntityKind};

use super::{Persistent, Record, Session};
use crate::jobs::{DeadLetterJobEntityManager, HistoryJobEntityManager, JobEntityManager};
use crate::query::Query;
use crate::services::EngineServices;
use crate::store::QueryParams;
use crate::tasks::{AttachmentEntityManager, TaskEntityManager};

/// Kind-specific validation over the session.
///
/// Hooks run before the mutation is staged; an error leaves the session untouched.
pub trait EntityManager: Send + Sync + Sized + 'static {
    type Entity: Persistent;

    fn create(services: &EngineServices) -> Self;

    /// Cache slot of this manager type.
    fn slot(cache: &mut ManagerCache) -> &mut Option<Arc<Self>>;

    fn validate_insert(&self, _session: &Session, _entity: &Self::Entity) -> EngineResult<()> {
        Ok(())
    }

    fn validate_update(&self, _session: &Session, _entity: &Self::Entity) -> EngineResult<()> {
        Ok(())
    }

    fn validate_delete(&self, _session: &Session, _entity: &Self::Entity) -> EngineResult<()> {
        Ok(())
    }
}

/// Per-context manager cache, one slot per entity kind.
#[derive(Debug, Default)]
pub struct ManagerCache {
    pub(crate) tasks: Option<Arc<TaskEntityManager>>,
    pub(crate) attachments: Option<Arc<AttachmentEntityManager>>,
    pub(crate) jobs: Option<Arc<JobEntityManager>>,
    pub(crate) dead_letter_jobs: Option<Arc<DeadLetterJobEntityManager>>,
    pub(crate) history_jobs: Option<Arc<HistoryJobEntityManager>>,
}

impl ManagerCache {
    /// Cached manager of type `M`, created on first use.
    pub fn get_or_create<M: EntityManager>(&mut self, services: &EngineServices) -> Arc<M> {
        M::slot(self)
            .get_or_insert_with(|| Arc::new(M::create(services)))
            .clone()
    }

    /// Number of managers constructed so far.
    pub fn len(&self) -> usize {
        [
            self.tasks.is_some(),
            self.attachments.is_some(),
            self.jobs.is_some(),
            self.dead_letter_jobs.is_some(),
            self.history_jobs.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Manager for a kind known only at runtime.
    pub fn by_kind(&mut self, kind: EntityKind, services: &EngineServices) -> AnyManager {
        match kind {
            EntityKind::Task => AnyManager::Task(self.get_or_create(services)),
            EntityKind::Attachment => AnyManager::Attachment(self.get_or_create(services)),
            EntityKind::Job => AnyManager::Job(self.get_or_create(services)),
            EntityKind::DeadLetterJob => AnyManager::DeadLetterJob(self.get_or_create(services)),
            EntityKind::HistoryJob => AnyManager::HistoryJob(self.get_or_create(services)),
        }
    }
}

/// Manager looked up by [`EntityKind`].
#[derive(Debug, Clone)]
pub enum AnyManager {
    Task(Arc<TaskEntityManager>),
    Attachment(Arc<AttachmentEntityManager>),
    Job(Arc<JobEntityManager>),
    DeadLetterJob(Arc<DeadLetterJobEntityManager>),
    HistoryJob(Arc<HistoryJobEntityManager>),
}

impl AnyManager {
    pub fn kind(&self) -> EntityKind {
        match self {
            AnyManager::Task(_) => EntityKind::Task,
            AnyManager::Attachment(_) => EntityKind::Attachment,
            AnyManager::Job(_) => EntityKind::Job,
            AnyManager::DeadLetterJob(_) => EntityKind::DeadLetterJob,
            AnyManager::HistoryJob(_) => EntityKind::HistoryJob,
        }
    }

    pub fn find_by_id(&self, session: &Session, id: &EntityId) -> EngineResult<Option<Record>> {
        session.find_by_id(self.kind(), id)
    }

    /// Validate and stage deletion of a type-erased record.
    pub fn delete(&self, session: &mut Session, record: Record) -> EngineResult<()> {
        match (self, record) {
            (AnyManager::Task(m), Record::Task(e)) => ManagerScope::new(m.clone(), session).delete(e),
            (AnyManager::Attachment(m), Record::Attachment(e)) => ManagerScope::new(m.clone(), session).delete(e),
            (AnyManager::Job(m), Record::Job(e)) => ManagerScope::new(m.clone(), session).delete(e),
            (AnyManager::DeadLetterJob(m), Record::DeadLetterJob(e)) => {
                ManagerScope::new(m.clone(), session).delete(e)
            }
            (AnyManager::HistoryJob(m), Record::HistoryJob(e)) => ManagerScope::new(m.clone(), session).delete(e),
            (manager, record) => Err(EngineError::illegal_argument(format!(
                "{} manager cannot delete a {} record",
                manager.kind(),
                record.kind()
            ))),
        }
    }
}

/// A manager bound to the session of one context.
pub struct ManagerScope<'c, M: EntityManager> {
    manager: Arc<M>,
    session: &'c mut Session,
}

impl<'c, M: EntityManager> ManagerScope<'c, M> {
    pub fn new(manager: Arc<M>, session: &'c mut Session) -> Self {
        Self { manager, session }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn session(&self) -> &Session {
        &*self.session
    }

    fn kind() -> EntityKind {
        <M::Entity as procflow_core::Entity>::KIND
    }

    fn typed(record: Record) -> EngineResult<M::Entity> {
        let found = record.kind();
        M::Entity::from_record(record).ok_or_else(|| {
            EngineError::illegal_state(format!("expected a {} row, got a {found} row", Self::kind()))
        })
    }

    pub fn find_by_id(&self, id: &EntityId) -> EngineResult<Option<M::Entity>> {
        self.session
            .find_by_id(Self::kind(), id)?
            .map(Self::typed)
            .transpose()
    }

    /// Like [`find_by_id`](Self::find_by_id), but absence is [`EngineError::ObjectNotFound`].
    pub fn get(&self, id: &EntityId) -> EngineResult<M::Entity> {
        self.find_by_id(id)?
            .ok_or_else(|| EngineError::not_found(Self::kind(), id.as_str()))
    }

    pub fn insert(&mut self, entity: M::Entity) -> EngineResult<()> {
        self.manager.validate_insert(&*self.session, &entity)?;
        self.session.insert(entity.into_record())
    }

    pub fn update(&mut self, entity: M::Entity) -> EngineResult<()> {
        self.manager.validate_update(&*self.session, &entity)?;
        self.session.update(entity.into_record())
    }

    pub fn delete(&mut self, entity: M::Entity) -> EngineResult<()> {
        self.manager.validate_delete(&*self.session, &entity)?;
        self.session.delete(entity.into_record())
    }

    /// Rows of the kind's criteria query.
    pub fn list(&self, params: &QueryParams) -> EngineResult<Vec<M::Entity>> {
        self.list_by(Self::kind().criteria_query_id(), params)
    }

    pub fn count(&self, params: &QueryParams) -> EngineResult<usize> {
        self.session.select_count(Self::kind().criteria_query_id(), params)
    }

    /// Builder over this kind, executed with `*_in` against the same context.
    pub fn query(&self) -> Query<M> {
        Query::detached()
    }

    /// Rows of a named query.
    pub fn list_by(&self, query_id: &str, params: &QueryParams) -> EngineResult<Vec<M::Entity>> {
        self.session
            .select_list(query_id, params)?
            .into_iter()
            .map(Self::typed)
            .collect()
    }

    /// At most one row of a named query.
    pub fn one_by(&self, query_id: &str, params: &QueryParams) -> EngineResult<Option<M::Entity>> {
        self.session
            .select_one(query_id, params)?
            .map(Self::typed)
            .transpose()
    }
}
