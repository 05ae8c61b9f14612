//! Shared fakes for the end-to-end tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hubframe_bus::{Message, Publisher};
use hubframe_core::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Log capture for failing test runs; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hubframe_adapter=debug")
        .with_test_writer()
        .try_init();
}

/// Publisher capturing everything that would have gone to the broker.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Message)>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<(String, Message)> {
        std::mem::take(&mut self.published.lock())
    }

    /// All captured messages of one type, with their topics.
    pub fn by_type(&self, message_type: &str) -> Vec<(String, Message)> {
        self.published
            .lock()
            .iter()
            .filter(|(_, m)| m.message_type == message_type)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        self.published
            .lock()
            .push((topic.to_string(), message.clone()));
        Ok(())
    }
}

/// Stamp the command topic an adapter would see from the broker.
pub fn inbound(adapter: &str, thing: &str, service: &str, mut message: Message) -> Message {
    message.topic = Some(format!(
        "pt:j1/mt:cmd/rt:dev/rn:{adapter}/ad:1/sv:{service}/ad:{thing}"
    ));
    message
}
