//! Engine façade: wires configuration, store, dispatcher, handlers and the
//! command pipeline together and exposes the public operations.

use std::sync::Arc;

use tracing::info;

use procflow_core::{EngineResult, EntityId};
use procflow_events::{EventDispatcher, EventListener};

use crate::command_executor::{Command, CommandConfig, CommandExecutor};
use crate::config::EngineConfig;
use crate::interceptor::CommandInterceptor;
use crate::jobs::{
    CreateJobCmd, DeleteDeadLetterJobCmd, DeleteHistoryJobCmd, DeleteJobCmd, JobEntity, JobExecutor, JobHandler,
    JobHandlerRegistry, MoveDeadLetterJobToExecutableJobCmd,
};
use crate::query::{AttachmentQuery, DeadLetterJobQuery, HistoryJobQuery, JobQuery, TaskQuery};
use crate::services::EngineServices;
use crate::store::{BackingStore, InMemoryStore};
use crate::tasks::{
    AttachmentEntity, CreateAttachmentCmd, DeleteAttachmentCmd, DeleteTaskCmd, SaveTaskCmd, TaskEntity,
};

pub struct ProcessEngine {
    name: String,
    commands: Arc<CommandExecutor>,
}

impl core::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("name", &self.name)
            .field("services", self.commands.services())
            .finish_non_exhaustive()
    }
}

impl ProcessEngine {
    pub fn builder() -> ProcessEngineBuilder {
        ProcessEngineBuilder::default()
    }

    /// In-memory engine configured from `PROCFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::builder().with_config(EngineConfig::from_env()).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self) -> &EngineServices {
        self.commands.services()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services().config
    }

    pub fn command_executor(&self) -> &Arc<CommandExecutor> {
        &self.commands
    }

    pub fn event_dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.services().events
    }

    pub fn job_handlers(&self) -> &JobHandlerRegistry {
        &self.services().job_handlers
    }

    pub fn execute<C: Command>(&self, command: &C) -> EngineResult<C::Output> {
        self.commands.execute(command)
    }

    pub fn execute_with<C: Command>(&self, config: CommandConfig, command: &C) -> EngineResult<C::Output> {
        self.commands.execute_with(config, command)
    }

    // --- jobs ---

    pub fn create_job(&self, command: CreateJobCmd) -> EngineResult<JobEntity> {
        self.execute(&command)
    }

    /// Cancel and delete an executable job. `None` or a blank id is `IllegalArgument`.
    pub fn delete_job(&self, job_id: Option<&str>) -> EngineResult<()> {
        self.execute(&DeleteJobCmd::from_nullable(job_id.map(str::to_owned)))
    }

    pub fn delete_history_job(&self, job_id: Option<&str>) -> EngineResult<()> {
        self.execute(&DeleteHistoryJobCmd::from_nullable(job_id.map(str::to_owned)))
    }

    pub fn delete_dead_letter_job(&self, job_id: Option<&str>) -> EngineResult<()> {
        self.execute(&DeleteDeadLetterJobCmd::from_nullable(job_id.map(str::to_owned)))
    }

    pub fn move_dead_letter_job_to_executable(&self, dead_letter_job_id: EntityId, retries: u32) -> EngineResult<JobEntity> {
        self.execute(&MoveDeadLetterJobToExecutableJobCmd {
            dead_letter_job_id,
            retries,
        })
    }

    /// Worker over this engine's pipeline, configured by `async_executor`.
    pub fn job_executor(&self) -> JobExecutor {
        JobExecutor::new(self.commands.clone(), self.config().async_executor.clone())
    }

    // --- tasks ---

    pub fn save_task(&self, task: TaskEntity) -> EngineResult<TaskEntity> {
        self.execute(&SaveTaskCmd { task })
    }

    pub fn delete_task(&self, task_id: EntityId) -> EngineResult<()> {
        self.execute(&DeleteTaskCmd { task_id })
    }

    pub fn create_attachment(&self, attachment: AttachmentEntity) -> EngineResult<AttachmentEntity> {
        self.execute(&CreateAttachmentCmd { attachment })
    }

    pub fn delete_attachment(&self, attachment_id: EntityId) -> EngineResult<()> {
        self.execute(&DeleteAttachmentCmd { attachment_id })
    }

    // --- queries ---

    pub fn create_task_query(&self) -> TaskQuery {
        TaskQuery::new(self.commands.clone())
    }

    pub fn create_attachment_query(&self) -> AttachmentQuery {
        AttachmentQuery::new(self.commands.clone())
    }

    pub fn create_job_query(&self) -> JobQuery {
        JobQuery::new(self.commands.clone())
    }

    pub fn create_dead_letter_job_query(&self) -> DeadLetterJobQuery {
        DeadLetterJobQuery::new(self.commands.clone())
    }

    pub fn create_history_job_query(&self) -> HistoryJobQuery {
        HistoryJobQuery::new(self.commands.clone())
    }

    /// Tear down: every registered listener is removed.
    pub fn close(&self) {
        self.event_dispatcher().clear();
        info!(engine = %self.name, "process engine closed");
    }
}

/// Builder for [`ProcessEngine`]. Defaults to an [`InMemoryStore`] and
/// [`EngineConfig::default`].
pub struct ProcessEngineBuilder {
    name: String,
    config: EngineConfig,
    store: Option<Arc<dyn BackingStore>>,
    listeners: Vec<Arc<dyn EventListener>>,
    pre_interceptors: Vec<Arc<dyn CommandInterceptor>>,
    command_config: CommandConfig,
    job_handlers: JobHandlerRegistry,
}

impl Default for ProcessEngineBuilder {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            config: EngineConfig::default(),
            store: None,
            listeners: Vec::new(),
            pre_interceptors: Vec::new(),
            command_config: CommandConfig::default(),
            job_handlers: JobHandlerRegistry::new(),
        }
    }
}

impl ProcessEngineBuilder {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_pre_interceptor(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.pre_interceptors.push(interceptor);
        self
    }

    pub fn with_command_config(mut self, config: CommandConfig) -> Self {
        self.command_config = config;
        self
    }

    pub fn with_job_handler<H>(self, pattern: impl Into<String>, handler: H) -> Self
    where
        H: JobHandler + 'static,
    {
        self.job_handlers.register(pattern, handler);
        self
    }

    pub fn build(self) -> ProcessEngine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn BackingStore>);
        let services = EngineServices::new(self.config, store).with_job_handlers(self.job_handlers);

        let listeners = self.listeners.len();
        for listener in self.listeners {
            services.events.add_listener(listener);
        }
        let events_enabled = services.events.is_enabled();

        let mut builder = CommandExecutor::builder(services).with_default_config(self.command_config);
        for interceptor in self.pre_interceptors {
            builder = builder.with_pre_interceptor(interceptor);
        }

        info!(engine = %self.name, listeners, events_enabled, "process engine built");

        ProcessEngine {
            name: self.name,
            commands: Arc::new(builder.build()),
        }
    }
}
