use pulsarbeat_api::{Delivery, Event};

/// Turns a broker delivery into the event forwarded downstream.
///
/// Must be total: any delivery maps to an event, nothing is dropped here.
pub trait EventMapper: Send + Sync {
    fn map(&self, delivery: Delivery, received_at_ms: i64) -> Event;
}

impl<F> EventMapper for F
where
    F: Fn(Delivery, i64) -> Event + Send + Sync,
{
    fn map(&self, delivery: Delivery, received_at_ms: i64) -> Event {
        self(delivery, received_at_ms)
    }
}

/// Default mapping: topic, producer, key and publish time are carried over,
/// the payload is moved as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PulsarMapper;

impl EventMapper for PulsarMapper {
    fn map(&self, delivery: Delivery, received_at_ms: i64) -> Event {
        Event {
            received_at_ms,
            topic: delivery.topic,
            producer: delivery.producer_name.unwrap_or_default(),
            key: delivery.key.filter(|k| !k.is_empty()),
            publish_time_ms: delivery.publish_time_ms,
            payload: delivery.payload,
        }
    }
}
