use std::collections::BTreeMap;
use std::fmt;

/// Broker-assigned identity of a received, not yet resolved message.
///
/// Deliberately neither `Clone` nor `Copy`: [`ack`](crate::SubscriptionHandle::ack)
/// and [`nack`](crate::SubscriptionHandle::nack) consume it, so an identity can
/// be resolved at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MessageId {
    partition: i32,
    sequence: u64,
}

impl MessageId {
    pub fn new(partition: i32, sequence: u64) -> Self {
        Self { partition, sequence }
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.sequence)
    }
}

/// Everything the broker delivered alongside the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Fully qualified topic (partition) the message was read from.
    pub topic: String,
    pub producer_name: Option<String>,
    pub key: Option<String>,
    /// Publish timestamp assigned by the producer, Unix milliseconds.
    pub publish_time_ms: i64,
    /// How many times the broker has already handed this message out.
    pub redelivery_count: u32,
    pub properties: BTreeMap<String, String>,
    /// Opaque bytes.
    pub payload: Vec<u8>,
}

/// A received message: identity plus delivery.
#[derive(Debug)]
pub struct Message {
    pub id: MessageId,
    pub delivery: Delivery,
}

impl Message {
    pub fn new(id: MessageId, delivery: Delivery) -> Self {
        Self { id, delivery }
    }

    pub fn into_parts(self) -> (MessageId, Delivery) {
        (self.id, self.delivery)
    }
}
