//! Core types for the hubframe adapter framework.
//!
//! This crate defines the shared error type, the adapter event model and the
//! in-process event bus that connects services, listeners and background
//! tasks inside one adapter process.

pub mod error;
pub mod event;
pub mod eventbus;

pub use error::{Error, Result};
pub use event::{
    AdapterEvent, ConnectivityEvent, EventClass, EventMetadata, InclusionEvent, LevelEvent,
};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, EventFilter, EventHandler,
    EventProcessor,
};
