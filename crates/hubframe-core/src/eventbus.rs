//! In-process event bus.
//!
//! Services publish [`AdapterEvent`]s, listeners subscribe either directly
//! (pull, via [`EventBusReceiver`]) or through a named [`EventHandler`]
//! whose processor runs on its own worker fed by a bounded channel. A slow
//! handler drops events instead of stalling publishers.

use crate::event::{AdapterEvent, EventClass, EventMetadata};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default broadcast capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Filter over events, composable with `and` / `or`.
#[derive(Clone)]
pub enum EventFilter {
    /// Match everything.
    Any,
    /// Match a single event class.
    Class(EventClass),
    /// Match events from one source component.
    Source(String),
    /// Match events for one thing address.
    Address(String),
    /// All sub-filters must match.
    And(Vec<EventFilter>),
    /// Any sub-filter must match.
    Or(Vec<EventFilter>),
}

impl EventFilter {
    /// Does this filter accept the event?
    pub fn matches(&self, event: &AdapterEvent, meta: &EventMetadata) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Class(c) => event.class() == *c,
            EventFilter::Source(s) => meta.source == *s,
            EventFilter::Address(a) => event.address() == a,
            EventFilter::And(fs) => fs.iter().all(|f| f.matches(event, meta)),
            EventFilter::Or(fs) => fs.iter().any(|f| f.matches(event, meta)),
        }
    }

    /// Combine with another filter, both must match.
    pub fn and(self, other: EventFilter) -> EventFilter {
        match self {
            EventFilter::And(mut fs) => {
                fs.push(other);
                EventFilter::And(fs)
            }
            f => EventFilter::And(vec![f, other]),
        }
    }

    /// Combine with another filter, either may match.
    pub fn or(self, other: EventFilter) -> EventFilter {
        match self {
            EventFilter::Or(mut fs) => {
                fs.push(other);
                EventFilter::Or(fs)
            }
            f => EventFilter::Or(vec![f, other]),
        }
    }
}

/// Processor side of an event handler.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Handle one event. Errors are the processor's business; the worker
    /// never stops on them.
    async fn process(&self, event: AdapterEvent, meta: EventMetadata);
}

/// A named subscription with its own worker and bounded buffer.
pub struct EventHandler {
    /// Handler name, used in logs.
    pub name: String,
    /// Capacity of the worker's inbox; events are dropped when it is full.
    pub buffer_size: usize,
    /// Which events reach the processor.
    pub filter: EventFilter,
    /// The processing callback.
    pub processor: Arc<dyn EventProcessor>,
}

impl EventHandler {
    /// Create a handler with a default buffer of 64 events.
    pub fn new(
        name: impl Into<String>,
        filter: EventFilter,
        processor: Arc<dyn EventProcessor>,
    ) -> Self {
        Self {
            name: name.into(),
            buffer_size: 64,
            filter,
            processor,
        }
    }

    /// Override the inbox capacity.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

/// Broadcast-based event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(AdapterEvent, EventMetadata)>,
    name: String,
}

impl EventBus {
    /// Create a bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given broadcast capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "adapter".to_string(),
        }
    }

    /// Bus name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns `true` if anyone was listening.
    pub fn publish(&self, event: AdapterEvent, source: impl Into<String>) -> bool {
        let meta = EventMetadata::new(source);
        debug!(bus = %self.name, class = ?event.class(), address = %event.address(), "publishing event");
        self.tx.send((event, meta)).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Spawn a worker for the handler and a forwarder feeding it.
    ///
    /// The forwarder applies the handler's filter and `try_send`s into the
    /// bounded inbox; when the inbox is full the event is dropped with a
    /// warning. The returned handle belongs to the worker task.
    pub fn attach_handler(&self, handler: EventHandler) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<(AdapterEvent, EventMetadata)>(
            handler.buffer_size,
        );
        let filter = handler.filter.clone();
        let forward_name = handler.name.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((event, meta)) => {
                        if !filter.matches(&event, &meta) {
                            continue;
                        }
                        if inbox_tx.try_send((event, meta)).is_err() {
                            warn!(handler = %forward_name, "event handler inbox full, dropping event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(handler = %forward_name, missed = n, "event handler lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let processor = handler.processor;
        let worker_name = handler.name;
        tokio::spawn(async move {
            while let Some((event, meta)) = inbox_rx.recv().await {
                processor.process(event, meta).await;
            }
            debug!(handler = %worker_name, "event handler worker stopped");
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull-style receiver for all bus events.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(AdapterEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event, skipping over lag gaps.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<(AdapterEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(pair) => return Some(pair),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<(AdapterEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}
