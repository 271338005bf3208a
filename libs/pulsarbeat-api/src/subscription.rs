use crate::BoxFuture;
use crate::cancel::CancelSignal;
use crate::error::ConnectorError;
use crate::message::{Message, MessageId};

/// Outcome of a single [`SubscriptionHandle::receive`] call.
#[derive(Debug)]
pub enum Received {
    Message(Message),
    /// Transient transport failure. When the broker already assigned an
    /// identity to a message before failing, it is carried in `held` and the
    /// caller must resolve it.
    Failed {
        error: ConnectorError,
        held: Option<MessageId>,
    },
    /// The cancel signal fired while waiting. Nothing was taken off the queue.
    Cancelled,
    /// The handle can never yield another message (consumer closed by the broker).
    Closed { reason: String },
}

/// One consumer attached to one subscription.
///
/// Owned by exactly one worker, hence `&mut self` and no `Sync` bound.
///
/// Implementations must also release the consumer when dropped without
/// [`close`](Self::close): a worker task that panics drops its handle, and
/// messages it held are only redelivered if the drop detaches them.
pub trait SubscriptionHandle: Send {
    /// Consumer name, used in logs and reports.
    fn name(&self) -> &str;

    /// Wait for the next message.
    ///
    /// Must return [`Received::Cancelled`] promptly once `cancel` fires, and must
    /// not dequeue a message it does not return.
    fn receive<'a>(&'a mut self, cancel: &'a CancelSignal) -> BoxFuture<'a, Received>;

    fn ack(&mut self, id: MessageId) -> BoxFuture<'_, Result<(), ConnectorError>>;

    /// Ask the broker to redeliver the message after its configured delay.
    fn nack(&mut self, id: MessageId) -> BoxFuture<'_, Result<(), ConnectorError>>;

    /// Detach from the subscription. Messages still unresolved become
    /// eligible for redelivery on the broker side.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), ConnectorError>>;
}
