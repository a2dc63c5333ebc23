//! Backing store boundary beneath the session.
//!
//! This module defines a keyed-query persistence abstraction without making
//! any assumption about the underlying query language, plus an in-memory
//! implementation for tests and embedding.

pub mod in_memory;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryStore, QueryPredicate};
pub use query::{Direction, Filter, OrderBy, Pagination, QueryParams};
pub use r#trait::{BackingStore, StoreError, StoreOperation};
