//! Query builders.

pub mod builder;
pub mod typed;

pub use builder::Query;
pub use typed::{AttachmentQuery, DeadLetterJobQuery, HistoryJobQuery, JobQuery, TaskQuery};
