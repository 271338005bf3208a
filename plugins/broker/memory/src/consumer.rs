use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use pulsarbeat_api::{
    BoxFuture, CancelSignal, ConnectorError, Message, MessageId, Received, SubscriptionHandle,
};

use crate::BrokerState;
use crate::queue::SubscriptionQueue;

/// One consumer on a memory-broker subscription, spanning one or more topics.
pub struct MemoryConsumer {
    name: String,
    id: u64,
    queues: Vec<Arc<SubscriptionQueue>>,
    notify: Arc<Notify>,
    broker: Arc<BrokerState>,
    nack_delay: Duration,
    next_queue: usize,
    detached: bool,
}

impl MemoryConsumer {
    pub(crate) fn new(
        name: String,
        id: u64,
        queues: Vec<Arc<SubscriptionQueue>>,
        notify: Arc<Notify>,
        broker: Arc<BrokerState>,
        nack_delay: Duration,
    ) -> Self {
        Self {
            name,
            id,
            queues,
            notify,
            broker,
            nack_delay,
            next_queue: 0,
            detached: false,
        }
    }

    fn queue_for(&self, id: &MessageId) -> Result<&Arc<SubscriptionQueue>, ConnectorError> {
        self.queues
            .iter()
            .find(|q| q.partition == id.partition())
            .ok_or_else(|| ConnectorError::rejected(format!("message {id} does not belong to consumer '{}'", self.name)))
    }

    /// Round-robin over the subscribed topics so one busy topic cannot starve the others.
    fn try_take(&mut self) -> Option<Message> {
        let count = self.queues.len();
        for offset in 0..count {
            let index = (self.next_queue + offset) % count;
            let queue = &self.queues[index];
            if let Some(pending) = queue.take(self.id) {
                self.next_queue = (index + 1) % count;
                let id = MessageId::new(queue.partition, pending.sequence);
                return Some(Message::new(id, pending.delivery));
            }
        }
        None
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        for queue in &self.queues {
            queue.detach(self.id);
        }
        tracing::debug!(consumer = %self.name, "consumer detached");
    }
}

impl SubscriptionHandle for MemoryConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive<'a>(&'a mut self, cancel: &'a CancelSignal) -> BoxFuture<'a, Received> {
        Box::pin(async move {
            loop {
                if self.broker.is_closed() {
                    return Received::Closed {
                        reason: "broker client closed".into(),
                    };
                }
                if let Some(message) = self.try_take() {
                    return Received::Message(message);
                }

                let notify = self.notify.clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Received::Cancelled,
                    _ = notify.notified() => continue,
                }
            }
        })
    }

    fn ack(&mut self, id: MessageId) -> BoxFuture<'_, Result<(), ConnectorError>> {
        let result = self.queue_for(&id).and_then(|queue| {
            queue
                .resolve(self.id, id.sequence())
                .map(|_| ())
                .ok_or_else(|| ConnectorError::rejected(format!("message {id} is not pending on '{}'", self.name)))
        });
        Box::pin(async move { result })
    }

    fn nack(&mut self, id: MessageId) -> BoxFuture<'_, Result<(), ConnectorError>> {
        let taken = self.queue_for(&id).and_then(|queue| {
            queue
                .resolve(self.id, id.sequence())
                .map(|pending| (queue.clone(), pending))
                .ok_or_else(|| ConnectorError::rejected(format!("message {id} is not pending on '{}'", self.name)))
        });
        let delay = self.nack_delay;

        Box::pin(async move {
            let (queue, pending) = taken?;
            if delay.is_zero() {
                queue.redeliver(pending);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.redeliver(pending);
                });
            }
            Ok(())
        })
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, Result<(), ConnectorError>> {
        self.detach();
        Box::pin(async { Ok(()) })
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.detach();
    }
}
