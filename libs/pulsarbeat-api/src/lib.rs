pub mod broker;
pub mod cancel;
pub mod error;
pub mod event;
pub mod message;
pub mod sink;
pub mod subscription;
pub mod util;

pub use broker::{Broker, InitialPosition, SubscribeOptions, SubscriptionType};
pub use cancel::CancelSignal;
pub use error::{ConnectorError, ErrorKind};
pub use event::Event;
pub use message::{Delivery, Message, MessageId};
pub use sink::Sink;
pub use subscription::{Received, SubscriptionHandle};

/// Boxed future returned by every capability trait in this crate.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
