/// Normalized event handed to a [`Sink`](crate::Sink).
///
/// Built once by the event mapper and moved into `Sink::send`; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// When the pump received the message, Unix milliseconds.
    pub received_at_ms: i64,
    pub topic: String,
    /// Empty when the producer did not name itself.
    pub producer: String,
    pub key: Option<String>,
    /// Producer publish time, Unix milliseconds.
    pub publish_time_ms: i64,
    pub payload: Vec<u8>,
}
