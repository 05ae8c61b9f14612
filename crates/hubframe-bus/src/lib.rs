//! Bus message model for hubframe adapters.
//!
//! Everything an adapter sends or receives on the hub bus goes through the
//! [`Message`] envelope: a typed value, a property map and routing metadata,
//! addressed by the `pt:j1/mt:…/rt:…/rn:…/ad:…/sv:…/ad:…` topic grammar.
//! The actual transport is pluggable behind the [`Publisher`] trait; an
//! MQTT implementation is available behind the `mqtt` feature.

pub mod address;
pub mod message;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod publisher;
pub mod value;

pub use address::{Address, MsgType, ResourceType};
pub use message::{Message, Props, StorageStrategy};
pub use publisher::{MessageSink, Publisher, Subscriber};
pub use value::{Value, ValueType};
