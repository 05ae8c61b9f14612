//! Bus-facing side of the virtual meter.
//!
//! `virtual_meter_elec` is the configuration surface: users push a
//! `mode → watts` map at it, query it back and tune the reporting interval.
//! The readings themselves come out of the synthesised `meter_elec` service.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, ReportOutcome, Service, ServiceBase};
use crate::spec::{props, Interface, ServiceSpecification};
use crate::virtual_meter::manager::VirtualMeterManager;
use async_trait::async_trait;
use hubframe_bus::{Address, Message, Publisher, Value, ValueType};
use hubframe_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_NAME: &str = "virtual_meter_elec";

pub const CMD_METER_ADD: &str = "cmd.meter.add";
pub const CMD_METER_REMOVE: &str = "cmd.meter.remove";
pub const CMD_METER_GET_REPORT: &str = "cmd.meter.get_report";
pub const CMD_CONFIG_SET_INTERVAL: &str = "cmd.config.set_interval";
pub const CMD_CONFIG_GET_INTERVAL: &str = "cmd.config.get_interval";

pub const EVT_METER_REPORT: &str = "evt.meter.report";
pub const EVT_CONFIG_INTERVAL_REPORT: &str = "evt.config.interval_report";

pub const PROP_UNIT: &str = "unit";

pub struct VirtualMeterService {
    base: ServiceBase,
    manager: Arc<VirtualMeterManager>,
}

impl VirtualMeterService {
    pub fn new(
        mut spec: ServiceSpecification,
        manager: Arc<VirtualMeterManager>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        spec.ensure_interfaces(vec![
            Interface::cmd(CMD_METER_ADD, ValueType::FloatMap),
            Interface::cmd(CMD_METER_REMOVE, ValueType::Null),
            Interface::cmd(CMD_METER_GET_REPORT, ValueType::Null),
            Interface::cmd(CMD_CONFIG_SET_INTERVAL, ValueType::Int),
            Interface::cmd(CMD_CONFIG_GET_INTERVAL, ValueType::Null),
            Interface::evt(EVT_METER_REPORT, ValueType::FloatMap),
            Interface::evt(EVT_CONFIG_INTERVAL_REPORT, ValueType::Int),
        ]);
        Self {
            base: ServiceBase::new(spec, publisher),
            manager,
        }
    }

    /// Validate the map against the declared mode and unit sets, then hand
    /// it to the manager.
    pub async fn add_meter(&self, modes: &HashMap<String, f64>, unit: &str) -> Result<()> {
        let spec = self.base.specification();
        let unit = spec
            .normalize_against(props::SUP_UNITS, unit)
            .ok_or_else(|| Error::Validation(format!("unsupported unit: {unit}")))?;
        let declared = spec.require_str_array(props::SUP_MODES)?;
        if modes.len() != declared.len() {
            return Err(Error::Validation(format!(
                "expected exactly the declared modes {declared:?}, got {} entries",
                modes.len()
            )));
        }
        for (mode, watts) in modes {
            if !declared.iter().any(|d| d == mode) {
                return Err(Error::Validation(format!("undeclared mode: {mode}")));
            }
            if !watts.is_finite() || *watts < 0.0 {
                return Err(Error::Validation(format!(
                    "invalid power for mode {mode}: {watts}"
                )));
            }
        }

        let _guard = self.base.serialize().await;
        self.manager
            .add_meter(self.thing_address(), modes.clone(), unit)
            .await
    }

    pub async fn remove_meter(&self) -> Result<()> {
        let _guard = self.base.serialize().await;
        self.manager.remove_meter(self.thing_address()).await
    }

    /// Publish the configured modes; an empty map after removal.
    pub async fn send_modes_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let modes = self.manager.modes(self.thing_address()).await?;
        self.base
            .publish_report(EVT_METER_REPORT, "", Value::FloatMap(modes), force, |m| m)
            .await
    }

    pub async fn set_interval(&self, seconds: i64) -> Result<()> {
        if seconds <= 0 {
            return Err(Error::Validation(format!(
                "reporting interval must be positive, got {seconds}"
            )));
        }
        let _guard = self.base.serialize().await;
        self.manager
            .set_reporting_interval(Duration::from_secs(seconds as u64))
    }

    pub async fn send_interval_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let interval = self.manager.reporting_interval()?;
        self.base
            .publish_report(
                EVT_CONFIG_INTERVAL_REPORT,
                "",
                Value::Int(interval.as_secs() as i64),
                force,
                |m| m,
            )
            .await
    }
}

impl Service for VirtualMeterService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct VirtualMeterCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for VirtualMeterCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let meter = as_capability::<VirtualMeterService>(&service)?;

        match message.message_type.as_str() {
            CMD_METER_ADD => {
                let modes = message.get_float_map()?;
                let unit = message
                    .props
                    .get_string(PROP_UNIT)
                    .ok_or_else(|| Error::Validation("unit property is required".to_string()))?;
                meter.add_meter(modes, unit).await?;
                meter.send_modes_report(true).await?;
            }
            CMD_METER_REMOVE => {
                meter.remove_meter().await?;
                meter.send_modes_report(true).await?;
            }
            CMD_METER_GET_REPORT => {
                meter.send_modes_report(true).await?;
            }
            CMD_CONFIG_SET_INTERVAL => {
                meter.set_interval(message.get_int()?).await?;
                meter.send_interval_report(true).await?;
            }
            CMD_CONFIG_GET_INTERVAL => {
                meter.send_interval_report(true).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported virtual meter command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for the virtual-meter service.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(VirtualMeterCommandHandler { registry });
    [
        CMD_METER_ADD,
        CMD_METER_REMOVE,
        CMD_METER_GET_REPORT,
        CMD_CONFIG_SET_INTERVAL,
        CMD_CONFIG_GET_INTERVAL,
    ]
    .into_iter()
    .map(|cmd| {
        Routing::new(handler.clone())
            .for_service(SERVICE_NAME)
            .for_type(cmd)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AdapterRegistry;
    use crate::service::testutil::CapturingPublisher;
    use crate::thing::ProductInfo;
    use crate::virtual_meter::store::VirtualMeterStorage;
    use hubframe_core::EventBus;
    use hubframe_storage::{KeyValueStore, MemoryBackend};

    async fn setup() -> (VirtualMeterService, Arc<CapturingPublisher>) {
        let publisher = CapturingPublisher::new();
        let storage =
            VirtualMeterStorage::new(KeyValueStore::new(Arc::new(MemoryBackend::new())));
        let manager = VirtualMeterManager::new(storage, publisher.clone());
        let registry = Arc::new(AdapterRegistry::new(
            "zw",
            "1",
            publisher.clone(),
            EventBus::new(),
        ));
        registry
            .register_thing("3", vec![], ProductInfo::default())
            .await
            .unwrap();
        manager.set_adapter(registry.clone()).await;

        let spec = ServiceSpecification::new(
            SERVICE_NAME,
            registry.service_address(SERVICE_NAME, "3"),
        )
        .with_prop(props::SUP_UNITS, serde_json::json!(["W", "kWh"]))
        .with_prop(props::SUP_MODES, serde_json::json!(["on", "off"]));
        (
            VirtualMeterService::new(spec, manager, publisher.clone()),
            publisher,
        )
    }

    fn on_off(on: f64, off: f64) -> HashMap<String, f64> {
        HashMap::from([("on".to_string(), on), ("off".to_string(), off)])
    }

    #[tokio::test]
    async fn test_add_rejects_undeclared_modes() {
        let (svc, _) = setup().await;
        let modes = HashMap::from([("eco".to_string(), 10.0), ("on".to_string(), 100.0)]);
        assert!(matches!(
            svc.add_meter(&modes, "W").await,
            Err(Error::Validation(_))
        ));

        // Too few entries fails too.
        let modes = HashMap::from([("on".to_string(), 100.0)]);
        assert!(svc.add_meter(&modes, "W").await.is_err());
    }

    #[tokio::test]
    async fn test_add_rejects_bad_unit_and_negative_power() {
        let (svc, _) = setup().await;
        assert!(svc.add_meter(&on_off(100.0, 1.0), "A").await.is_err());
        assert!(svc.add_meter(&on_off(-5.0, 1.0), "W").await.is_err());
    }

    #[tokio::test]
    async fn test_modes_report_round_trip_and_empty_after_remove() {
        let (svc, publisher) = setup().await;
        svc.add_meter(&on_off(100.0, 1.0), "w").await.unwrap();

        svc.send_modes_report(true).await.unwrap();
        let msg = publisher.last().unwrap();
        assert_eq!(msg.message_type, EVT_METER_REPORT);
        assert_eq!(msg.get_float_map().unwrap(), &on_off(100.0, 1.0));

        svc.remove_meter().await.unwrap();
        svc.send_modes_report(true).await.unwrap();
        assert!(publisher.last().unwrap().get_float_map().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interval_report_defaults_and_persists() {
        let (svc, publisher) = setup().await;
        svc.send_interval_report(true).await.unwrap();
        assert_eq!(publisher.last().unwrap().get_int().unwrap(), 30 * 60);

        svc.set_interval(600).await.unwrap();
        svc.send_interval_report(true).await.unwrap();
        assert_eq!(publisher.last().unwrap().get_int().unwrap(), 600);

        assert!(svc.set_interval(0).await.is_err());
    }
}
