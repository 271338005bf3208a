//! In-process broker.
//!
//! Implements [`Broker`] on top of plain queues so the pump can run without a
//! real cluster: topics are created on first use, every named subscription
//! keeps its own cursor, negative acknowledgments come back after the
//! consumer's redelivery delay, and whatever a consumer still holds when it
//! detaches is redelivered to the others.

mod consumer;
mod queue;
pub mod replay;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use pulsarbeat_api::util::now_ms;
use pulsarbeat_api::{
    BoxFuture, Broker, ConnectorError, Delivery, InitialPosition, SubscribeOptions, SubscriptionHandle,
};

pub use consumer::MemoryConsumer;
use queue::{Pending, SubscriptionQueue};

/// URL scheme served by this broker.
pub const SCHEME: &str = "memory://";

/// A message to publish.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    pub key: Option<String>,
    pub producer_name: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl Outgoing {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer_name = Some(producer.into());
        self
    }
}

struct TopicState {
    partition: i32,
    /// Everything ever published, for subscriptions starting at `Earliest`.
    log: Vec<Pending>,
    subscriptions: HashMap<String, Arc<SubscriptionQueue>>,
}

#[derive(Default)]
pub(crate) struct BrokerState {
    topics: Mutex<HashMap<String, TopicState>>,
    closed: AtomicBool,
    next_sequence: AtomicU64,
    next_consumer: AtomicU64,
}

impl BrokerState {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicState>> {
        match self.topics.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory broker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cheap to clone; clones share the same topics.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("topics", &self.topic_names())
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to `topic`, creating it if needed. Returns the message sequence.
    pub fn publish(&self, topic: &str, message: Outgoing) -> Result<u64, ConnectorError> {
        if self.state.is_closed() {
            return Err(ConnectorError::closed("broker client closed"));
        }

        let sequence = self.state.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = Pending {
            sequence,
            delivery: Delivery {
                topic: topic.to_string(),
                producer_name: message.producer_name,
                key: message.key,
                publish_time_ms: now_ms(),
                redelivery_count: 0,
                properties: message.properties,
                payload: message.payload,
            },
        };

        let mut topics = self.state.lock();
        let state = topic_entry(&mut topics, topic);
        for queue in state.subscriptions.values() {
            queue.push(pending.clone());
        }
        state.log.push(pending);
        Ok(sequence)
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Messages not yet handed out on `subscription` of `topic`.
    pub fn backlog(&self, topic: &str, subscription: &str) -> usize {
        self.with_queue(topic, subscription, |q| q.backlog()).unwrap_or(0)
    }

    /// Messages handed out but neither acked nor nacked yet.
    pub fn unacked(&self, topic: &str, subscription: &str) -> usize {
        self.with_queue(topic, subscription, |q| q.unacked()).unwrap_or(0)
    }

    pub fn consumers(&self, topic: &str, subscription: &str) -> usize {
        self.with_queue(topic, subscription, |q| q.consumer_count()).unwrap_or(0)
    }

    fn with_queue<T>(&self, topic: &str, subscription: &str, f: impl FnOnce(&SubscriptionQueue) -> T) -> Option<T> {
        let topics = self.state.lock();
        topics.get(topic)?.subscriptions.get(subscription).map(|q| f(q.as_ref()))
    }
}

fn topic_entry<'a>(topics: &'a mut HashMap<String, TopicState>, topic: &str) -> &'a mut TopicState {
    let partition = topics.len() as i32;
    topics.entry(topic.to_string()).or_insert_with(|| {
        tracing::debug!(topic = %topic, partition, "created topic");
        TopicState {
            partition,
            log: Vec::new(),
            subscriptions: HashMap::new(),
        }
    })
}

impl Broker for MemoryBroker {
    fn subscribe(
        &self,
        options: &SubscribeOptions,
    ) -> BoxFuture<'_, Result<Box<dyn SubscriptionHandle>, ConnectorError>> {
        let result = self.attach(options);
        Box::pin(async move { result })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ConnectorError>> {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            let topics = self.state.lock();
            for topic in topics.values() {
                for queue in topic.subscriptions.values() {
                    queue.wake();
                }
            }
            tracing::debug!("memory broker closed");
        }
        Box::pin(async { Ok(()) })
    }
}

impl MemoryBroker {
    fn attach(&self, options: &SubscribeOptions) -> Result<Box<dyn SubscriptionHandle>, ConnectorError> {
        let consumer_ctx = format!("consumer '{}'", options.consumer_name);
        if self.state.is_closed() {
            return Err(ConnectorError::closed("broker client closed").with_context(&consumer_ctx));
        }
        if options.topics_pattern.is_some() {
            return Err(ConnectorError::config("topics_pattern is not supported by the memory broker")
                .with_context(&consumer_ctx));
        }
        if options.topics.is_empty() {
            return Err(ConnectorError::config("no topic to subscribe to").with_context(&consumer_ctx));
        }
        if options.subscription_name.is_empty() {
            return Err(ConnectorError::config("subscription name is empty").with_context(&consumer_ctx));
        }

        let id = self.state.next_consumer.fetch_add(1, Ordering::Relaxed) + 1;
        let notify = Arc::new(Notify::new());
        let mut queues: Vec<Arc<SubscriptionQueue>> = Vec::with_capacity(options.topics.len());

        let mut topics = self.state.lock();
        for topic in &options.topics {
            let state = topic_entry(&mut topics, topic);
            let existing = state.subscriptions.get(&options.subscription_name).cloned();
            let queue = match existing {
                Some(queue) if queue.kind != options.subscription_type => {
                    let err = ConnectorError::rejected(format!(
                        "subscription '{}' on '{topic}' is {:?}, requested {:?}",
                        queue.name, queue.kind, options.subscription_type
                    ));
                    drop(topics);
                    rollback(&queues, id);
                    return Err(err.with_context(&consumer_ctx));
                }
                Some(queue) => queue,
                None => {
                    let backlog = match options.initial_position {
                        InitialPosition::Earliest => state.log.clone(),
                        InitialPosition::Latest => Vec::new(),
                    };
                    let queue = Arc::new(SubscriptionQueue::new(
                        options.subscription_name.clone(),
                        state.partition,
                        options.subscription_type,
                        backlog,
                    ));
                    state.subscriptions.insert(options.subscription_name.clone(), queue.clone());
                    queue
                }
            };

            if let Err(reason) = queue.attach(id, notify.clone()) {
                drop(topics);
                rollback(&queues, id);
                return Err(ConnectorError::rejected(reason).with_context(&consumer_ctx));
            }
            queues.push(queue);
        }
        drop(topics);

        tracing::debug!(
            consumer = %options.consumer_name,
            subscription = %options.subscription_name,
            topics = ?options.topics,
            "consumer attached"
        );
        Ok(Box::new(MemoryConsumer::new(
            options.consumer_name.clone(),
            id,
            queues,
            notify,
            self.state.clone(),
            options.nack_redelivery_delay,
        )))
    }
}

fn rollback(queues: &[Arc<SubscriptionQueue>], id: u64) {
    for queue in queues {
        queue.detach(id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulsarbeat_api::{CancelSignal, MessageId, Received, SubscriptionType};

    use super::*;

    fn options(consumer: &str, kind: SubscriptionType, position: InitialPosition) -> SubscribeOptions {
        SubscribeOptions {
            topics: vec!["orders".into()],
            subscription_name: "beats".into(),
            consumer_name: consumer.into(),
            subscription_type: kind,
            initial_position: position,
            nack_redelivery_delay: Duration::from_millis(500),
            ..Default::default()
        }
    }

    async fn next(handle: &mut Box<dyn SubscriptionHandle>) -> pulsarbeat_api::Message {
        let cancel = CancelSignal::new();
        match tokio::time::timeout(Duration::from_secs(5), handle.receive(&cancel)).await {
            Ok(Received::Message(m)) => m,
            Ok(other) => panic!("expected a message, got {other:?}"),
            Err(_) => panic!("no message within timeout"),
        }
    }

    #[tokio::test]
    async fn earliest_sees_backlog_latest_does_not() {
        let broker = MemoryBroker::new();
        broker.publish("orders", Outgoing::new("old")).unwrap();

        let mut early = broker
            .subscribe(&SubscribeOptions {
                subscription_name: "early".into(),
                ..options("c-1", SubscriptionType::Exclusive, InitialPosition::Earliest)
            })
            .await
            .unwrap();
        let _late = broker
            .subscribe(&options("c-2", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .unwrap();

        assert_eq!(next(&mut early).await.delivery.payload, b"old");
        assert_eq!(broker.backlog("orders", "beats"), 0);

        broker.publish("orders", Outgoing::new("new").with_key("k").with_producer("p")).unwrap();
        assert_eq!(broker.backlog("orders", "beats"), 1);
    }

    #[tokio::test]
    async fn ack_resolves_once() {
        let broker = MemoryBroker::new();
        let mut handle = broker
            .subscribe(&options("c-1", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .unwrap();
        broker.publish("orders", Outgoing::new("a")).unwrap();

        let message = next(&mut handle).await;
        let seq = message.id.sequence();
        assert_eq!(broker.unacked("orders", "beats"), 1);
        handle.ack(message.id).await.unwrap();
        assert_eq!(broker.unacked("orders", "beats"), 0);

        let err = handle.ack(MessageId::new(0, seq)).await.unwrap_err();
        assert_eq!(err.kind(), pulsarbeat_api::ErrorKind::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_redelivers_after_delay() {
        let broker = MemoryBroker::new();
        let mut handle = broker
            .subscribe(&options("c-1", SubscriptionType::Shared, InitialPosition::Latest))
            .await
            .unwrap();
        broker.publish("orders", Outgoing::new("retry-me")).unwrap();

        let first = next(&mut handle).await;
        assert_eq!(first.delivery.redelivery_count, 0);
        handle.nack(first.id).await.unwrap();
        assert_eq!(broker.backlog("orders", "beats"), 0);

        let again = next(&mut handle).await;
        assert_eq!(again.delivery.payload, b"retry-me");
        assert_eq!(again.delivery.redelivery_count, 1);
    }

    #[tokio::test]
    async fn exclusive_subscription_rejects_second_consumer() {
        let broker = MemoryBroker::new();
        let first = broker
            .subscribe(&options("c-1", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .unwrap();
        let err = broker
            .subscribe(&options("c-2", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), pulsarbeat_api::ErrorKind::Rejected);
        assert!(err.message.contains("c-2"));

        first.close().await.unwrap();
        broker
            .subscribe(&options("c-2", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mismatched_subscription_type_is_rejected() {
        let broker = MemoryBroker::new();
        let _shared = broker
            .subscribe(&options("c-1", SubscriptionType::Shared, InitialPosition::Latest))
            .await
            .unwrap();
        assert!(broker
            .subscribe(&options("c-2", SubscriptionType::Failover, InitialPosition::Latest))
            .await
            .is_err());
        assert_eq!(broker.consumers("orders", "beats"), 1);
    }

    #[tokio::test]
    async fn unacked_messages_return_on_close() {
        let broker = MemoryBroker::new();
        let mut a = broker
            .subscribe(&options("c-1", SubscriptionType::Shared, InitialPosition::Latest))
            .await
            .unwrap();
        let mut b = broker
            .subscribe(&options("c-2", SubscriptionType::Shared, InitialPosition::Latest))
            .await
            .unwrap();
        broker.publish("orders", Outgoing::new("held")).unwrap();

        let held = next(&mut a).await;
        assert_eq!(held.delivery.payload, b"held");
        a.close().await.unwrap();

        let moved = next(&mut b).await;
        assert_eq!(moved.delivery.payload, b"held");
        assert_eq!(moved.delivery.redelivery_count, 1);
    }

    #[tokio::test]
    async fn receive_returns_on_cancel() {
        let broker = MemoryBroker::new();
        let mut handle = broker
            .subscribe(&options("c-1", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .unwrap();
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        let received = tokio::time::timeout(Duration::from_secs(5), handle.receive(&cancel))
            .await
            .unwrap();
        assert!(matches!(received, Received::Cancelled));
    }

    #[tokio::test]
    async fn closing_the_broker_closes_receivers() {
        let broker = MemoryBroker::new();
        let mut handle = broker
            .subscribe(&options("c-1", SubscriptionType::Exclusive, InitialPosition::Latest))
            .await
            .unwrap();
        broker.close().await.unwrap();

        let cancel = CancelSignal::new();
        assert!(matches!(handle.receive(&cancel).await, Received::Closed { .. }));
        assert!(broker.publish("orders", Outgoing::new("x")).is_err());
    }

    #[tokio::test]
    async fn topics_pattern_is_rejected() {
        let broker = MemoryBroker::new();
        let err = broker
            .subscribe(&SubscribeOptions {
                topics_pattern: Some("persistent://public/default/.*".into()),
                ..options("c-1", SubscriptionType::Exclusive, InitialPosition::Latest)
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), pulsarbeat_api::ErrorKind::Config);
    }

    fn spawn_receive(mut handle: Box<dyn SubscriptionHandle>) -> tokio::task::JoinHandle<Option<Vec<u8>>> {
        tokio::spawn(async move {
            let cancel = CancelSignal::new();
            match tokio::time::timeout(Duration::from_secs(2), handle.receive(&cancel)).await {
                Ok(Received::Message(m)) => Some(m.delivery.payload),
                _ => None,
            }
        })
    }

    #[tokio::test]
    async fn failover_hands_backlog_to_standby_on_close() {
        let broker = MemoryBroker::new();
        let active = broker
            .subscribe(&options("c-1", SubscriptionType::Failover, InitialPosition::Latest))
            .await
            .unwrap();
        let standby = broker
            .subscribe(&options("c-2", SubscriptionType::Failover, InitialPosition::Latest))
            .await
            .unwrap();

        let waiting = spawn_receive(standby);
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("orders", Outgoing::new("m")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.backlog("orders", "beats"), 1);

        active.close().await.unwrap();
        assert_eq!(waiting.await.unwrap(), Some(b"m".to_vec()));
    }

    #[tokio::test]
    async fn key_shared_rebalances_keys_when_a_consumer_leaves() {
        let broker = MemoryBroker::new();
        let first = broker
            .subscribe(&options("c-1", SubscriptionType::KeyShared, InitialPosition::Latest))
            .await
            .unwrap();
        let second = broker
            .subscribe(&options("c-2", SubscriptionType::KeyShared, InitialPosition::Latest))
            .await
            .unwrap();
        let key = (0..1000)
            .map(|i| format!("k{i}"))
            .find(|k| queue::key_slot(Some(k.as_str()), 2) == 1)
            .unwrap();

        let waiting = spawn_receive(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("orders", Outgoing::new("keyed").with_key(key)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.backlog("orders", "beats"), 1);

        second.close().await.unwrap();
        assert_eq!(waiting.await.unwrap(), Some(b"keyed".to_vec()));
    }

    #[tokio::test]
    async fn dropped_consumer_releases_held_messages() {
        let broker = MemoryBroker::new();
        let mut a = broker
            .subscribe(&options("c-1", SubscriptionType::Shared, InitialPosition::Latest))
            .await
            .unwrap();
        let mut b = broker
            .subscribe(&options("c-2", SubscriptionType::Shared, InitialPosition::Latest))
            .await
            .unwrap();
        broker.publish("orders", Outgoing::new("held")).unwrap();

        let _held = next(&mut a).await;
        drop(a);
        assert_eq!(broker.consumers("orders", "beats"), 1);

        let moved = next(&mut b).await;
        assert_eq!(moved.delivery.payload, b"held");
        assert_eq!(moved.delivery.redelivery_count, 1);
    }
}
