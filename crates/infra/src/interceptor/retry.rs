use tracing::warn;

use procflow_core::{EngineError, EngineResult};

use super::{CommandInterceptor, ContextSlot, Invocation, Next};

/// Re-runs the inner chain, command included, when it fails with
/// [`EngineError::Concurrency`].
///
/// Only applies to invocations that own their context; nested commands
/// surface conflicts to the enclosing command, whose own retry covers them.
/// No delay between attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryInterceptor;

impl CommandInterceptor for RetryInterceptor {
    fn intercept(&self, invocation: &Invocation<'_>, context: ContextSlot<'_>, next: Next<'_>) -> EngineResult<()> {
        let ctx = match context {
            ContextSlot::Owned(ctx) if invocation.config.retry_on_conflict => ctx,
            other => return next.run(invocation, other),
        };

        let max_attempts = invocation
            .config
            .max_attempts
            .unwrap_or(invocation.services.config.command_retry_attempts)
            .max(1);

        let mut attempt = 1;
        loop {
            match next.run(invocation, ContextSlot::Owned(&mut *ctx)) {
                Err(EngineError::Concurrency(msg)) if attempt < max_attempts => {
                    warn!(
                        command = %invocation.command_name,
                        attempt,
                        max_attempts,
                        error = %msg,
                        "optimistic locking conflict; retrying command"
                    );
                    attempt += 1;
                }
                Err(EngineError::Concurrency(msg)) => {
                    warn!(
                        command = %invocation.command_name,
                        attempts = attempt,
                        error = %msg,
                        "optimistic locking conflict; retries exhausted"
                    );
                    return Err(EngineError::Concurrency(msg));
                }
                other => return other,
            }
        }
    }
}
