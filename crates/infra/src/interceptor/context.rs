use procflow_core::EngineResult;

use super::{CommandInterceptor, ContextSlot, Invocation, Next};
use crate::context::ExecutionContext;

/// Establishes the execution context.
///
/// Reuses a context supplied by an enclosing command; otherwise creates one
/// and closes it exactly once when the inner chain returns, whatever the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextInterceptor;

impl CommandInterceptor for ContextInterceptor {
    fn intercept(&self, invocation: &Invocation<'_>, context: ContextSlot<'_>, next: Next<'_>) -> EngineResult<()> {
        match context {
            ContextSlot::Missing => {
                let mut ctx = ExecutionContext::new(invocation.services.clone());
                let result = next.run(invocation, ContextSlot::Owned(&mut ctx));
                ctx.close();
                result
            }
            existing => next.run(invocation, existing),
        }
    }
}
