//! Process-wide services shared by every execution context.

use std::sync::Arc;

use procflow_events::EventDispatcher;

use crate::config::EngineConfig;
use crate::jobs::JobHandlerRegistry;
use crate::store::BackingStore;

/// Everything a context needs from the engine, passed explicitly at
/// construction. Cheap to clone.
#[derive(Clone)]
pub struct EngineServices {
    pub config: Arc<EngineConfig>,
    pub store: Arc<dyn BackingStore>,
    pub events: Arc<EventDispatcher>,
    pub job_handlers: Arc<JobHandlerRegistry>,
}

impl core::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineServices")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl EngineServices {
    pub fn new(config: EngineConfig, store: Arc<dyn BackingStore>) -> Self {
        let events = Arc::new(EventDispatcher::new(config.event_dispatcher_enabled));
        Self {
            config: Arc::new(config),
            store,
            events,
            job_handlers: Arc::new(JobHandlerRegistry::new()),
        }
    }

    pub fn with_job_handlers(mut self, handlers: JobHandlerRegistry) -> Self {
        self.job_handlers = Arc::new(handlers);
        self
    }

    pub fn with_event_dispatcher(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }
}
