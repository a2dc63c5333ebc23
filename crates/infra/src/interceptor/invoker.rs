use procflow_core::{EngineError, EngineResult};

use super::{CommandInterceptor, ContextSlot, Invocation, Next};

/// Last link: runs the command body.
///
/// With an owned context the session is flushed on success and rolled back
/// on any error, including a failed flush, so a failed invocation leaves the
/// store untouched. With a borrowed context the enclosing owner does both.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandInvoker;

impl CommandInterceptor for CommandInvoker {
    fn intercept(&self, invocation: &Invocation<'_>, context: ContextSlot<'_>, _next: Next<'_>) -> EngineResult<()> {
        match context {
            ContextSlot::Owned(ctx) => {
                let result = (invocation.body)(ctx).and_then(|()| ctx.flush().map(|_| ()));
                if result.is_err() {
                    ctx.rollback();
                }
                result
            }
            ContextSlot::Borrowed(ctx) => (invocation.body)(ctx),
            ContextSlot::Missing => Err(EngineError::illegal_state(format!(
                "command '{}' reached the invoker without an execution context",
                invocation.command_name
            ))),
        }
    }
}
