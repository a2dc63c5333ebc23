//! Command execution pipeline.
//!
//! Every externally visible operation is a [`Command`] executed as one unit
//! of work:
//!
//! ```text
//! Command
//!   ↓
//! 1. Establish an ExecutionContext (new session, empty manager cache)
//!   ↓
//! 2. Run the command: reads/writes go through entity managers and are
//!    staged in the session; events are dispatched as decisions are made
//!   ↓
//! 3. Flush the session in one atomic store call
//!   ↓
//! 4. Success → COMMITTED; any error → ROLLED_BACK (nothing reaches the store)
//!   ↓
//! 5. On Concurrency, repeat from 2 (bounded), then surface the error
//! ```
//!
//! ## Contract for command authors
//!
//! Because a conflicting command is re-run from the top, `execute` must be
//! safe to repeat: all side effects besides event dispatch go through the
//! session. Events dispatched by a failed attempt are not recalled.
//!
//! ## Nested commands
//!
//! [`CommandExecutor::execute_in`] runs a command inside an existing context:
//! the nested command shares the enclosing session and commits or rolls back
//! with it.

use std::cell::RefCell;
use std::sync::Arc;

use procflow_core::{EngineError, EngineResult};

use crate::context::ExecutionContext;
use crate::interceptor::{
    CommandInterceptor, CommandInvoker, ContextInterceptor, ContextSlot, Invocation, LogInterceptor, Next,
    RetryInterceptor,
};
use crate::services::EngineServices;

/// A unit of business logic executed within an [`ExecutionContext`].
pub trait Command {
    type Output;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<Self::Output>;

    /// Name used in logs.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

impl<F, T> Command for F
where
    F: Fn(&mut ExecutionContext) -> EngineResult<T>,
{
    type Output = T;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<T> {
        self(ctx)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Per-invocation execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    /// Re-run the command on an optimistic-lock conflict.
    pub retry_on_conflict: bool,
    /// Overrides the engine's `command_retry_attempts`.
    pub max_attempts: Option<u32>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            retry_on_conflict: true,
            max_attempts: None,
        }
    }
}

impl CommandConfig {
    /// Surface the first conflict to the caller.
    pub fn no_retry() -> Self {
        Self {
            retry_on_conflict: false,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Single entry point for running commands.
pub struct CommandExecutor {
    services: EngineServices,
    chain: Vec<Arc<dyn CommandInterceptor>>,
    default_config: CommandConfig,
}

impl core::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("interceptors", &self.chain.len())
            .field("default_config", &self.default_config)
            .finish()
    }
}

impl CommandExecutor {
    /// Executor with the built-in chain only.
    pub fn new(services: EngineServices) -> Self {
        Self::builder(services).build()
    }

    pub fn builder(services: EngineServices) -> CommandExecutorBuilder {
        CommandExecutorBuilder {
            services,
            pre_interceptors: Vec::new(),
            default_config: CommandConfig::default(),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn default_config(&self) -> CommandConfig {
        self.default_config
    }

    /// Run `command` in a fresh unit of work with the default configuration.
    pub fn execute<C: Command>(&self, command: &C) -> EngineResult<C::Output> {
        self.execute_with(self.default_config, command)
    }

    /// Run `command` in a fresh unit of work.
    pub fn execute_with<C: Command>(&self, config: CommandConfig, command: &C) -> EngineResult<C::Output> {
        self.run(config, command, ContextSlot::Missing)
    }

    /// Run `command` inside an enclosing command's context. Never retried,
    /// never flushed here: the enclosing invocation decides.
    pub fn execute_in<C: Command>(&self, ctx: &mut ExecutionContext, command: &C) -> EngineResult<C::Output> {
        self.run(CommandConfig::no_retry(), command, ContextSlot::Borrowed(ctx))
    }

    fn run<C: Command>(&self, config: CommandConfig, command: &C, context: ContextSlot<'_>) -> EngineResult<C::Output> {
        let output = RefCell::new(None);
        let body = |ctx: &mut ExecutionContext| -> EngineResult<()> {
            let value = command.execute(ctx)?;
            *output.borrow_mut() = Some(value);
            Ok(())
        };

        let invocation = Invocation {
            command_name: command.name(),
            config: &config,
            services: &self.services,
            body: &body,
        };
        Next::new(&self.chain).run(&invocation, context)?;

        output.into_inner().ok_or_else(|| {
            EngineError::illegal_state(format!("command '{}' completed without a result", command.name()))
        })
    }
}

/// Builder for [`CommandExecutor`].
pub struct CommandExecutorBuilder {
    services: EngineServices,
    pre_interceptors: Vec<Arc<dyn CommandInterceptor>>,
    default_config: CommandConfig,
}

impl CommandExecutorBuilder {
    /// Insert an interceptor ahead of the built-in ones, after any added earlier.
    pub fn with_pre_interceptor(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.pre_interceptors.push(interceptor);
        self
    }

    pub fn with_default_config(mut self, config: CommandConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn build(self) -> CommandExecutor {
        let mut chain = self.pre_interceptors;
        chain.push(Arc::new(LogInterceptor));
        chain.push(Arc::new(ContextInterceptor));
        chain.push(Arc::new(RetryInterceptor));
        chain.push(Arc::new(CommandInvoker));

        CommandExecutor {
            services: self.services,
            chain,
            default_config: self.default_config,
        }
    }
}
