//! Synchronous, process-wide event dispatcher.
//!
//! - No IO / no async: listeners run on the calling thread, in registration order
//! - Can be disabled globally (dispatch becomes a no-op)
//! - Listener failures are isolated: logged, never propagated

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use crate::{EngineEvent, EngineEventType, EventListener};

/// Handle returned by registration, used to remove a listener again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    /// `None` subscribes to every event type.
    types: Option<HashSet<EngineEventType>>,
    listener: Arc<dyn EventListener>,
}

impl Registration {
    fn accepts(&self, event_type: EngineEventType) -> bool {
        self.types.as_ref().is_none_or(|t| t.contains(&event_type))
    }
}

/// Process-wide pub/sub for engine lifecycle events.
///
/// Shared by reference (`Arc`) with every execution context. Lifecycle:
/// construct (optionally registering core listeners), toggle with
/// [`enable`](Self::enable) / [`disable`](Self::disable), tear down with
/// [`clear`](Self::clear).
pub struct EventDispatcher {
    enabled: AtomicBool,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Registration>>,
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("enabled", &self.is_enabled())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventDispatcher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    /// Register a listener for every event type.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.register(None, listener)
    }

    /// Register a listener for the given event types only.
    ///
    /// An empty set is treated as "every type".
    pub fn add_typed_listener(
        &self,
        types: impl IntoIterator<Item = EngineEventType>,
        listener: Arc<dyn EventListener>,
    ) -> ListenerId {
        let types: HashSet<_> = types.into_iter().collect();
        let types = if types.is_empty() { None } else { Some(types) };
        self.register(types, listener)
    }

    fn register(
        &self,
        types: Option<HashSet<EngineEventType>>,
        listener: Arc<dyn EventListener>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        listeners.push(Registration {
            id,
            types,
            listener,
        });
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Drop every registered listener (engine teardown).
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Deliver `event` to every matching listener, first-registered first.
    ///
    /// Returns the number of listeners that handled the event without error.
    /// A no-op (returning 0) while the dispatcher is disabled.
    pub fn dispatch(&self, event: &EngineEvent) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        // Snapshot so listeners may (un)register while being notified.
        let targets: Vec<Arc<dyn EventListener>> = {
            let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner());
            listeners
                .iter()
                .filter(|r| r.accepts(event.event_type()))
                .map(|r| r.listener.clone())
                .collect()
        };

        let mut delivered = 0;
        for listener in targets {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    error!(
                        listener = listener.name(),
                        event_type = %event.event_type(),
                        entity_id = %event.entity_id(),
                        error = %err,
                        "event listener failed; continuing"
                    );
                }
                Err(_) => {
                    error!(
                        listener = listener.name(),
                        event_type = %event.event_type(),
                        entity_id = %event.entity_id(),
                        "event listener panicked; continuing"
                    );
                }
            }
        }

        debug!(
            event_type = %event.event_type(),
            entity_id = %event.entity_id(),
            delivered,
            "event dispatched"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use procflow_core::{EntityId, EntityKind};

    use super::*;
    use crate::EventSubject;

    fn event(event_type: EngineEventType) -> EngineEvent {
        EngineEvent::new(
            event_type,
            EventSubject {
                kind: EntityKind::Job,
                id: EntityId::parse("job-1").unwrap(),
                snapshot: serde_json::json!({}),
            },
            Utc::now(),
        )
    }

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn EventListener> {
        Arc::new(move |e: &EngineEvent| -> anyhow::Result<()> {
            log.lock().unwrap().push(format!("{tag}:{}", e.event_type()));
            Ok(())
        })
    }

    #[test]
    fn listeners_are_notified_in_registration_order() {
        let dispatcher = EventDispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_listener(recorder(log.clone(), "first"));
        dispatcher.add_listener(recorder(log.clone(), "second"));

        assert_eq!(dispatcher.dispatch(&event(EngineEventType::JobCanceled)), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:JOB_CANCELED", "second:JOB_CANCELED"]
        );
    }

    #[test]
    fn disabled_dispatcher_is_a_no_op() {
        let dispatcher = EventDispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_listener(recorder(log.clone(), "only"));

        dispatcher.disable();
        assert_eq!(dispatcher.dispatch(&event(EngineEventType::EntityCreated)), 0);
        assert!(log.lock().unwrap().is_empty());

        dispatcher.enable();
        assert_eq!(dispatcher.dispatch(&event(EngineEventType::EntityCreated)), 1);
    }

    #[test]
    fn failing_listener_does_not_block_later_listeners() {
        let dispatcher = EventDispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_listener(Arc::new(|_: &EngineEvent| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }));
        dispatcher.add_listener(Arc::new(|_: &EngineEvent| -> anyhow::Result<()> {
            panic!("listener bug")
        }));
        dispatcher.add_listener(recorder(log.clone(), "late"));

        assert_eq!(dispatcher.dispatch(&event(EngineEventType::JobCanceled)), 1);
        assert_eq!(*log.lock().unwrap(), vec!["late:JOB_CANCELED"]);
    }

    #[test]
    fn typed_listener_only_sees_its_types() {
        let dispatcher = EventDispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_typed_listener([EngineEventType::JobCanceled], recorder(log.clone(), "typed"));

        dispatcher.dispatch(&event(EngineEventType::EntityDeleted));
        dispatcher.dispatch(&event(EngineEventType::JobCanceled));
        assert_eq!(*log.lock().unwrap(), vec!["typed:JOB_CANCELED"]);
    }

    #[test]
    fn removed_and_cleared_listeners_stop_receiving() {
        let dispatcher = EventDispatcher::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = dispatcher.add_listener(recorder(log.clone(), "a"));
        dispatcher.add_listener(recorder(log.clone(), "b"));

        assert!(dispatcher.remove_listener(id));
        assert!(!dispatcher.remove_listener(id));
        dispatcher.dispatch(&event(EngineEventType::EntityUpdated));
        assert_eq!(*log.lock().unwrap(), vec!["b:ENTITY_UPDATED"]);

        dispatcher.clear();
        assert_eq!(dispatcher.listener_count(), 0);
    }
}
