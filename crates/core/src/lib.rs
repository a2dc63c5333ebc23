//! `procflow-core`: engine foundation building blocks.
//!
//! This crate contains **pure** primitives shared by every layer of the engine
//! (no storage, no dispatching).

pub mod entity;
pub mod error;
pub mod id;
pub mod revision;

pub use entity::{Entity, EntityKind};
pub use error::{EngineError, EngineResult};
pub use id::EntityId;
pub use revision::ExpectedRevision;
