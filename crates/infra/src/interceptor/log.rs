use std::time::Instant;

use tracing::{debug, debug_span};

use procflow_core::EngineResult;

use super::{CommandInterceptor, ContextSlot, Invocation, Next};

/// Diagnostic span and timing around the rest of the chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInterceptor;

impl CommandInterceptor for LogInterceptor {
    fn intercept(&self, invocation: &Invocation<'_>, context: ContextSlot<'_>, next: Next<'_>) -> EngineResult<()> {
        let span = debug_span!("command", command = %invocation.command_name);
        let _enter = span.enter();

        let started = Instant::now();
        debug!("command started");
        let result = next.run(invocation, context);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => debug!(elapsed_ms, "command finished"),
            Err(err) => debug!(elapsed_ms, error = %err, "command failed"),
        }
        result
    }
}
