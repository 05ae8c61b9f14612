//! Transport-facing traits.
//!
//! Services publish through a [`Publisher`]; inbound traffic is delivered to
//! a [`MessageSink`]. The MQTT transport implements both, and tests swap in
//! capturing fakes.

use crate::address::Address;
use crate::message::Message;
use async_trait::async_trait;
use hubframe_core::Result;

/// Outbound half of the bus transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a serialized message on a raw topic.
    async fn publish(&self, topic: &str, message: &Message) -> Result<()>;

    /// Publish to a structured address.
    async fn publish_to(&self, address: &Address, message: &Message) -> Result<()> {
        self.publish(&address.to_topic(), message).await
    }
}

/// Inbound half: something that accepts received messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one inbound message. The topic is already attached to the
    /// message.
    async fn deliver(&self, message: Message);
}

/// Topic subscription control, for clients that manage their own inbound
/// topics (the prime client subscribes to its response topic on demand).
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}
