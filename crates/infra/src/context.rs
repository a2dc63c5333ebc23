//! Per-invocation unit of work.

use std::any::Any;
use std::collections::HashMap;

use tracing::debug;

use procflow_core::{EngineResult, EntityKind};
use procflow_events::{EngineEvent, EngineEventType, EventDispatcher};

use crate::config::EngineConfig;
use crate::jobs::{DeadLetterJobEntityManager, HistoryJobEntityManager, JobEntityManager};
use crate::persistence::{AnyManager, EntityManager, ManagerCache, ManagerScope, Persistent, Session};
use crate::services::EngineServices;
use crate::tasks::{AttachmentEntityManager, TaskEntityManager};

/// Resources owned by one command invocation: the session, the lazily built
/// entity managers, and an attribute bag for cross-cutting data.
///
/// Exclusively owned by the executing call stack; nested commands receive it
/// by `&mut` and so commit or roll back together with their parent. The
/// session is closed when the context is closed or dropped.
pub struct ExecutionContext {
    services: EngineServices,
    session: Session,
    managers: ManagerCache,
    attributes: HashMap<String, Box<dyn Any + Send>>,
    closed: bool,
}

impl core::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session", &self.session)
            .field("managers", &self.managers.len())
            .field("attributes", &self.attributes.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(services: EngineServices) -> Self {
        let session = Session::new(services.store.clone());
        Self {
            services,
            session,
            managers: ManagerCache::default(),
            attributes: HashMap::new(),
            closed: false,
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.services.events
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Manager of type `M` bound to this context's session.
    pub fn manager<M: EntityManager>(&mut self) -> ManagerScope<'_, M> {
        let manager = self.managers.get_or_create::<M>(&self.services);
        ManagerScope::new(manager, &mut self.session)
    }

    /// Manager for a kind known only at runtime.
    pub fn entity_manager(&mut self, kind: EntityKind) -> AnyManager {
        self.managers.by_kind(kind, &self.services)
    }

    pub fn tasks(&mut self) -> ManagerScope<'_, TaskEntityManager> {
        self.manager()
    }

    pub fn attachments(&mut self) -> ManagerScope<'_, AttachmentEntityManager> {
        self.manager()
    }

    pub fn jobs(&mut self) -> ManagerScope<'_, JobEntityManager> {
        self.manager()
    }

    pub fn dead_letter_jobs(&mut self) -> ManagerScope<'_, DeadLetterJobEntityManager> {
        self.manager()
    }

    pub fn history_jobs(&mut self) -> ManagerScope<'_, HistoryJobEntityManager> {
        self.manager()
    }

    /// Dispatch a lifecycle event about `entity` right away, if the
    /// dispatcher is enabled. Returns the number of listeners reached.
    pub fn dispatch<E: Persistent>(&self, event_type: EngineEventType, entity: &E) -> usize {
        let events = &self.services.events;
        if !events.is_enabled() {
            return 0;
        }
        events.dispatch(&EngineEvent::for_entity(event_type, entity))
    }

    pub fn set_attribute<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    /// `None` when absent or of a different type.
    pub fn attribute<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key)?.downcast_ref()
    }

    pub fn remove_attribute<T: Any + Send>(&mut self, key: &str) -> Option<T> {
        let value = self.attributes.remove(key)?;
        value.downcast().ok().map(|b| *b)
    }

    pub fn flush(&mut self) -> EngineResult<usize> {
        self.session.flush()
    }

    pub fn rollback(&mut self) {
        self.session.rollback();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the session and drop cached managers and attributes. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.session.close();
        self.managers = ManagerCache::default();
        self.attributes.clear();
        self.closed = true;
        debug!("execution context closed");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.close();
    }
}
