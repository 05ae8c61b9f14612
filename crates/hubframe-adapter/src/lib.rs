//! Device-adapter framework for the hub bus.
//!
//! An adapter bridges a vendor protocol to the hub-wide MQTT bus. This crate
//! supplies the bus-facing half: the routing table, the reporting cache, the
//! uniform service layer around vendor controllers, periodic reporting
//! tasks, the virtual-meter subsystem and the prime client. Vendor drivers
//! plug in by implementing the controller traits of the capability services.

pub mod battery;
pub mod cache;
pub mod chargepoint;
pub mod devsys;
pub mod meter;
pub mod outlvlswitch;
pub mod parameters;
pub mod prime;
pub mod registry;
pub mod router;
pub mod service;
pub mod spec;
pub mod task;
pub mod thing;
pub mod virtual_meter;

pub use cache::{ReportingCache, ReportingStrategy};
pub use registry::{AdapterRegistry, Registry};
pub use router::{MessageHandler, Router, Routing};
pub use service::{as_capability, ReportOutcome, Service, ServiceBase};
pub use spec::{Direction, Interface, ServiceSpecification};
pub use thing::{InclusionReport, ProductInfo};
