use crate::BoxFuture;
use crate::error::ConnectorError;
use crate::event::Event;

/// Downstream publisher.
///
/// Shared by every worker of a pump, so implementations must tolerate
/// concurrent `send` calls. Retries and buffering are the sink's business:
/// the pump treats any `Err` as final for that delivery attempt and
/// negatively acknowledges the message.
pub trait Sink: Send + Sync {
    fn send(&self, event: Event) -> BoxFuture<'_, Result<(), ConnectorError>>;

    /// Flush and release resources. Called once after all workers drained.
    fn close(&self) -> BoxFuture<'_, Result<(), ConnectorError>> {
        Box::pin(async { Ok(()) })
    }
}
