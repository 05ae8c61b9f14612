//! Virtual electrical meter.
//!
//! Synthesises a numeric meter for things that only report an on/off state
//! or dimmer level: the user supplies a `mode → watts` map, the framework
//! integrates power over time and serves the result through a regular
//! `meter_elec` service.

pub mod listener;
pub mod manager;
pub mod service;
pub mod store;

pub use listener::virtual_meter_handler;
pub use manager::{VirtualMeterManager, DEFAULT_RECALCULATION_PERIOD};
pub use service::{VirtualMeterService, SERVICE_NAME};
pub use store::{
    format_go_duration, parse_go_duration, DeviceRecord, VirtualMeterStorage,
    DEFAULT_REPORTING_INTERVAL,
};
