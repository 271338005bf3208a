use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::BoxFuture;
use crate::error::ConnectorError;
use crate::subscription::SubscriptionHandle;

/// How consumers attached to the same subscription share its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum SubscriptionType {
    /// A single consumer; a second attach is rejected.
    #[default]
    Exclusive,
    /// Messages are spread across all attached consumers.
    Shared,
    /// One active consumer, the others stand by.
    Failover,
    /// Shared, but messages with the same key stick to one consumer.
    KeyShared,
}

impl SubscriptionType {
    /// Unknown names fall back to `Exclusive`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Shared" => Self::Shared,
            "Failover" => Self::Failover,
            "KeyShared" => Self::KeyShared,
            _ => Self::Exclusive,
        }
    }
}

impl From<String> for SubscriptionType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

/// Where a brand new subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum InitialPosition {
    Earliest,
    #[default]
    Latest,
}

impl InitialPosition {
    /// Only `"Earliest"` selects the start of the topic.
    pub fn from_name(name: &str) -> Self {
        if name == "Earliest" { Self::Earliest } else { Self::Latest }
    }
}

impl From<String> for InitialPosition {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

/// Everything a broker needs to attach one consumer.
///
/// Tuning knobs (`receiver_queue_size`, `auto_discovery_period`, ...) are
/// passed through untouched; the pump never interprets them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
    pub topics: Vec<String>,
    pub topics_pattern: Option<String>,
    pub auto_discovery_period: Duration,
    pub subscription_name: String,
    pub consumer_name: String,
    pub properties: BTreeMap<String, String>,
    pub subscription_type: SubscriptionType,
    pub initial_position: InitialPosition,
    pub receiver_queue_size: usize,
    pub nack_redelivery_delay: Duration,
    pub read_compacted: bool,
    pub replicate_subscription_state: bool,
}

/// Broker client: the factory for subscription handles.
pub trait Broker: Send + Sync {
    fn subscribe(
        &self,
        options: &SubscribeOptions,
    ) -> BoxFuture<'_, Result<Box<dyn SubscriptionHandle>, ConnectorError>>;

    /// Close the client. Called after every handle has been released.
    fn close(&self) -> BoxFuture<'_, Result<(), ConnectorError>> {
        Box::pin(async { Ok(()) })
    }
}
