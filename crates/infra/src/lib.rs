//! Infrastructure layer: backing store, sessions, entity managers, the
//! command pipeline, queries, jobs, tasks and the engine façade.

pub mod command_executor;
pub mod config;
pub mod context;
pub mod engine;
pub mod interceptor;
pub mod jobs;
pub mod persistence;
pub mod query;
pub mod services;
pub mod store;
pub mod tasks;

mod integration_tests;

pub use command_executor::{Command, CommandConfig, CommandExecutor, CommandExecutorBuilder};
pub use config::{EngineConfig, JobExecutorConfig};
pub use context::ExecutionContext;
pub use engine::{ProcessEngine, ProcessEngineBuilder};
pub use services::EngineServices;
