//! Engine lifecycle events and their synchronous dispatcher.

pub mod dispatcher;
pub mod event;
pub mod listener;

pub use dispatcher::{EventDispatcher, ListenerId};
pub use event::{EngineEvent, EngineEventType, EventSubject};
pub use listener::EventListener;
