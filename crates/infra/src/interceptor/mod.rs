//! Interceptor chain around command execution.
//!
//! Each interceptor wraps the rest of the chain and decides whether, and how
//! often, to call it. The built-in order is:
//!
//! ```text
//! [custom pre-interceptors]
//!   ↓
//! LogInterceptor       (span + timing)
//!   ↓
//! ContextInterceptor   (create the context if none, close it on every exit path)
//!   ↓
//! RetryInterceptor     (re-run the inner chain on Concurrency, bounded)
//!   ↓
//! CommandInvoker       (run the command, flush on success, roll back on error)
//! ```

mod context;
mod invoker;
mod log;
mod retry;

use std::sync::Arc;

use procflow_core::{EngineError, EngineResult};

use crate::command_executor::CommandConfig;
use crate::context::ExecutionContext;
use crate::services::EngineServices;

pub use context::ContextInterceptor;
pub use invoker::CommandInvoker;
pub use log::LogInterceptor;
pub use retry::RetryInterceptor;

/// Type-erased command body: runs the command and records its output.
pub type CommandBody<'a> = dyn Fn(&mut ExecutionContext) -> EngineResult<()> + 'a;

/// One pass of a command through the chain.
pub struct Invocation<'a> {
    pub command_name: &'a str,
    pub config: &'a CommandConfig,
    pub services: &'a EngineServices,
    pub(crate) body: &'a CommandBody<'a>,
}

/// The execution context as seen at some point of the chain.
pub enum ContextSlot<'c> {
    /// No context yet; the context interceptor creates one.
    Missing,
    /// Created by this invocation, which commits or rolls it back.
    Owned(&'c mut ExecutionContext),
    /// Supplied by an enclosing command; the owner commits or rolls back.
    Borrowed(&'c mut ExecutionContext),
}

impl ContextSlot<'_> {
    pub fn is_owned(&self) -> bool {
        matches!(self, ContextSlot::Owned(_))
    }
}

/// A link of the chain.
pub trait CommandInterceptor: Send + Sync {
    fn intercept(&self, invocation: &Invocation<'_>, context: ContextSlot<'_>, next: Next<'_>) -> EngineResult<()>;
}

/// Remainder of the chain after the current interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    remaining: &'a [Arc<dyn CommandInterceptor>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn CommandInterceptor>]) -> Self {
        Self { remaining: chain }
    }

    pub fn run(self, invocation: &Invocation<'_>, context: ContextSlot<'_>) -> EngineResult<()> {
        match self.remaining.split_first() {
            Some((head, rest)) => head.intercept(invocation, context, Next { remaining: rest }),
            None => Err(EngineError::illegal_state(format!(
                "interceptor chain ended before command '{}' was invoked",
                invocation.command_name
            ))),
        }
    }
}
