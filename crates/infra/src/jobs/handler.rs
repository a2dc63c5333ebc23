//! Job handler registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::context::ExecutionContext;

use super::JobEntity;

/// Business logic behind a job's `handler_type`.
///
/// Runs inside the executing command's context, so any entity work it does
/// commits or rolls back together with the job's own completion.
pub trait JobHandler: Send + Sync {
    fn execute(&self, job: &JobEntity, ctx: &mut ExecutionContext) -> anyhow::Result<()>;
}

impl<F> JobHandler for F
where
    F: Fn(&JobEntity, &mut ExecutionContext) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, job: &JobEntity, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        self(job, ctx)
    }
}

/// Handlers keyed by pattern.
///
/// Lookup order: exact `handler_type`, then the longest matching category
/// pattern (`"mail.*"` matches `"mail.send"`), then the `"*"` wildcard.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl core::fmt::Debug for JobHandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        let mut patterns: Vec<_> = handlers.keys().collect();
        patterns.sort();
        f.debug_struct("JobHandlerRegistry")
            .field("patterns", &patterns)
            .finish()
    }
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a pattern.
    pub fn register<H>(&self, pattern: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pattern.into(), Arc::new(handler));
    }

    pub fn unregister(&self, pattern: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(pattern)
            .is_some()
    }

    /// Handler for a job's `handler_type`.
    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn JobHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());

        if let Some(h) = handlers.get(handler_type) {
            return Some(h.clone());
        }

        let category = handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                handler_type
                    .strip_prefix(prefix)
                    .filter(|rest| rest.starts_with('.'))
                    .map(|_| (prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler.clone());
        if category.is_some() {
            return category;
        }

        handlers.get("*").cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty()
    }
}
