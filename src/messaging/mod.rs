//! Broadcast and direct messaging between agents over a pub/sub bus.

mod bus;
mod envelope;
mod error;
mod messenger;

#[cfg(feature = "http")]
mod dapr;

pub use bus::{InMemoryMessageBus, MessageBus, MessageSubscription};
pub use envelope::{MessageEnvelope, MessageKind};
pub use error::{MessagingError, MessagingResult};
pub use messenger::AgentMessenger;

#[cfg(feature = "http")]
pub use dapr::DaprPublisher;
