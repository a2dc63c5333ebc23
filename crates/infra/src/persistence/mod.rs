//! Unit-of-work persistence: records, the write-behind session, and entity managers.

pub mod manager;
pub mod record;
pub mod session;

pub use manager::{AnyManager, EntityManager, ManagerCache, ManagerScope};
pub use record::{Persistent, Record};
pub use session::Session;
