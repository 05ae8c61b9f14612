//! Event-bus listener driving the virtual meter.
//!
//! Level events move the integration forward, connectivity events gate it,
//! and inclusion reports (re-)attach the virtual-meter services to things
//! that gained an out-level-switch.

use crate::outlvlswitch::{self, OutLvlSwitchService};
use crate::registry::Registry;
use crate::service::as_capability;
use crate::virtual_meter::manager::VirtualMeterManager;
use async_trait::async_trait;
use hubframe_core::{
    AdapterEvent, EventClass, EventFilter, EventHandler, EventMetadata, EventProcessor, LevelEvent,
};
use std::sync::Arc;
use tracing::warn;

struct VirtualMeterListener {
    manager: Arc<VirtualMeterManager>,
    registry: Arc<dyn Registry>,
}

impl VirtualMeterListener {
    /// Turn a raw switch level into the `(mode, fraction)` pair the
    /// integration works with.
    async fn resolve_level(&self, event: &LevelEvent) -> Option<(&'static str, f64)> {
        let mode = if event.level > 0 { "on" } else { "off" };
        let max_level = self
            .registry
            .services_by_name(outlvlswitch::SERVICE_NAME)
            .await
            .into_iter()
            .find(|s| s.thing_address() == event.address)
            .and_then(|s| {
                as_capability::<OutLvlSwitchService>(&s)
                    .map(|switch| switch.max_level())
                    .ok()
            })?;
        if max_level <= 0 {
            return None;
        }
        let fraction = (event.level as f64 / max_level as f64).clamp(0.0, 1.0);
        Some((mode, fraction))
    }

    async fn on_level(&self, event: LevelEvent) {
        if !event.has_changed && !self.manager.update_required(&event.address).await {
            return;
        }
        let Some((mode, fraction)) = self.resolve_level(&event).await else {
            return;
        };
        if let Err(e) = self.manager.update(&event.address, mode, fraction).await {
            warn!(thing = %event.address, error = %e, "virtual meter update failed");
        }
    }
}

#[async_trait]
impl EventProcessor for VirtualMeterListener {
    async fn process(&self, event: AdapterEvent, _meta: EventMetadata) {
        match event {
            AdapterEvent::Level(e) => self.on_level(e).await,
            AdapterEvent::Connectivity(e) => {
                if let Err(err) = self.manager.set_active(&e.address, e.connected).await {
                    warn!(thing = %e.address, error = %err, "virtual meter activity update failed");
                }
            }
            AdapterEvent::InclusionReportSent(e) => {
                if let Err(err) = self.manager.register_thing(&e.address).await {
                    warn!(thing = %e.address, error = %err, "virtual meter registration failed");
                }
            }
            _ => {}
        }
    }
}

/// Event-bus handler wiring the manager to level, connectivity and
/// inclusion events.
pub fn virtual_meter_handler(
    manager: Arc<VirtualMeterManager>,
    registry: Arc<dyn Registry>,
) -> EventHandler {
    EventHandler::new(
        "virtual-meter",
        EventFilter::Class(EventClass::Level)
            .or(EventFilter::Class(EventClass::Connectivity))
            .or(EventFilter::Class(EventClass::InclusionReportSent)),
        Arc::new(VirtualMeterListener { manager, registry }),
    )
}
