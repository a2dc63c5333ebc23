use crate::EngineEvent;

/// Receives engine events synchronously on the dispatching thread.
///
/// A returned error is logged by the dispatcher and otherwise ignored: it never
/// reaches the command that raised the event, and it does not stop later
/// listeners from being notified. Delivery is best-effort, so listeners must not
/// assume exactly-once delivery across restarts.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;

    /// Name used in log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> EventListener for F
where
    F: Fn(&EngineEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self(event)
    }
}
