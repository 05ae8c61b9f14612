//! Battery service.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, ReportOutcome, Service, ServiceBase};
use crate::spec::{Interface, ServiceSpecification};
use async_trait::async_trait;
use hubframe_bus::{Address, Message, Publisher, StorageStrategy, Value, ValueType};
use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "battery";

pub const CMD_LVL_GET_REPORT: &str = "cmd.lvl.get_report";
pub const CMD_BATTERY_GET_REPORT: &str = "cmd.battery.get_report";
pub const CMD_ALARM_GET_REPORT: &str = "cmd.alarm.get_report";
pub const CMD_HEALTH_GET_REPORT: &str = "cmd.health.get_report";
pub const CMD_SENSOR_GET_REPORT: &str = "cmd.sensor.get_report";

pub const EVT_LVL_REPORT: &str = "evt.lvl.report";
pub const EVT_BATTERY_REPORT: &str = "evt.battery.report";
pub const EVT_ALARM_REPORT: &str = "evt.alarm.report";
pub const EVT_HEALTH_REPORT: &str = "evt.health.report";
pub const EVT_SENSOR_REPORT: &str = "evt.sensor.report";

/// Battery alarm as reported by the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmReport {
    /// Alarm event name, e.g. `low_battery`.
    pub event: String,
    /// `activ` or `inactiv`.
    pub status: String,
}

/// Aggregated battery state for the full report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryFullReport {
    pub lvl: i64,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<f64>,
}

/// Mandatory vendor interface.
#[async_trait]
pub trait BatteryController: Send + Sync {
    /// Current charge level in percent plus a state string.
    async fn battery_level_report(&self) -> Result<(i64, String)>;

    /// Alarm status for one alarm event.
    async fn battery_alarm_report(&self, event: &str) -> Result<AlarmReport>;
}

/// Optional battery-health capability.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    /// Health in percent.
    async fn battery_health_report(&self) -> Result<i64>;
}

/// Optional battery-temperature capability.
#[async_trait]
pub trait SensorReporter: Send + Sync {
    /// Temperature in °C.
    async fn battery_sensor_report(&self) -> Result<f64>;
}

/// Controller bundle; optional slots decide the interface set.
pub struct BatteryControllers {
    pub battery: Arc<dyn BatteryController>,
    pub health: Option<Arc<dyn HealthReporter>>,
    pub sensor: Option<Arc<dyn SensorReporter>>,
}

/// Battery capability service.
pub struct BatteryService {
    base: ServiceBase,
    controllers: BatteryControllers,
}

impl BatteryService {
    pub fn new(
        mut spec: ServiceSpecification,
        controllers: BatteryControllers,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        spec.ensure_interfaces(vec![
            Interface::cmd(CMD_LVL_GET_REPORT, ValueType::Null),
            Interface::evt(EVT_LVL_REPORT, ValueType::Int),
            Interface::cmd(CMD_BATTERY_GET_REPORT, ValueType::Null),
            Interface::evt(EVT_BATTERY_REPORT, ValueType::Object),
            Interface::cmd(CMD_ALARM_GET_REPORT, ValueType::String),
            Interface::evt(EVT_ALARM_REPORT, ValueType::StrMap),
        ]);
        if controllers.health.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_HEALTH_GET_REPORT, ValueType::Null),
                Interface::evt(EVT_HEALTH_REPORT, ValueType::Int),
            ]);
        }
        if controllers.sensor.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_SENSOR_GET_REPORT, ValueType::Null),
                Interface::evt(EVT_SENSOR_REPORT, ValueType::Float),
            ]);
        }
        Self {
            base: ServiceBase::new(spec, publisher),
            controllers,
        }
    }

    /// Publish `evt.lvl.report` with the current charge level.
    pub async fn send_battery_level_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let (level, state) = self.controllers.battery.battery_level_report().await?;
        self.base
            .publish_report(EVT_LVL_REPORT, "", Value::Int(level), force, |m| {
                m.with_prop("state", state)
            })
            .await
    }

    /// Publish `evt.alarm.report` for one alarm event.
    pub async fn send_battery_alarm_report(
        &self,
        event: &str,
        force: bool,
    ) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let report = self.controllers.battery.battery_alarm_report(event).await?;
        let mut map = HashMap::new();
        map.insert("event".to_string(), report.event.clone());
        map.insert("status".to_string(), report.status);
        self.base
            .publish_report(EVT_ALARM_REPORT, event, Value::StrMap(map), force, |m| {
                m.with_storage_strategy(StorageStrategy::Aggregate, Some(report.event.clone()))
            })
            .await
    }

    /// Publish `evt.health.report`; requires the health capability.
    pub async fn send_battery_health_report(&self, force: bool) -> Result<ReportOutcome> {
        let reporter = self
            .controllers
            .health
            .as_ref()
            .ok_or_else(|| Error::Capability("battery health".to_string()))?;
        let _guard = self.base.serialize().await;
        let health = reporter.battery_health_report().await?;
        self.base
            .publish_report(EVT_HEALTH_REPORT, "", Value::Int(health), force, |m| m)
            .await
    }

    /// Publish `evt.sensor.report`; requires the sensor capability.
    pub async fn send_battery_sensor_report(&self, force: bool) -> Result<ReportOutcome> {
        let reporter = self
            .controllers
            .sensor
            .as_ref()
            .ok_or_else(|| Error::Capability("battery sensor".to_string()))?;
        let _guard = self.base.serialize().await;
        let temperature = reporter.battery_sensor_report().await?;
        self.base
            .publish_report(EVT_SENSOR_REPORT, "", Value::Float(temperature), force, |m| m)
            .await
    }

    /// Publish the aggregated `evt.battery.report` object.
    pub async fn send_battery_full_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let (lvl, state) = self.controllers.battery.battery_level_report().await?;
        let health = match &self.controllers.health {
            Some(h) => Some(h.battery_health_report().await?),
            None => None,
        };
        let sensor = match &self.controllers.sensor {
            Some(s) => Some(s.battery_sensor_report().await?),
            None => None,
        };
        let report = BatteryFullReport {
            lvl,
            state,
            health,
            sensor,
        };
        self.base
            .publish_report(
                EVT_BATTERY_REPORT,
                "",
                Value::Object(serde_json::to_value(&report)?),
                force,
                |m| m,
            )
            .await
    }
}

impl Service for BatteryService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct BatteryCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for BatteryCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let battery = as_capability::<BatteryService>(&service)?;

        match message.message_type.as_str() {
            CMD_LVL_GET_REPORT => {
                battery.send_battery_level_report(true).await?;
            }
            CMD_BATTERY_GET_REPORT => {
                battery.send_battery_full_report(true).await?;
            }
            CMD_ALARM_GET_REPORT => {
                let event = message.get_string()?;
                battery.send_battery_alarm_report(event, true).await?;
            }
            CMD_HEALTH_GET_REPORT => {
                battery.send_battery_health_report(true).await?;
            }
            CMD_SENSOR_GET_REPORT => {
                battery.send_battery_sensor_report(true).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported battery command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for the battery service.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(BatteryCommandHandler { registry });
    [
        CMD_LVL_GET_REPORT,
        CMD_BATTERY_GET_REPORT,
        CMD_ALARM_GET_REPORT,
        CMD_HEALTH_GET_REPORT,
        CMD_SENSOR_GET_REPORT,
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
    use crate::service::testutil::CapturingPublisher;

    struct FakeBattery {
        level: i64,
        state: &'static str,
    }

    #[async_trait]
    impl BatteryController for FakeBattery {
        async fn battery_level_report(&self) -> Result<(i64, String)> {
            Ok((self.level, self.state.to_string()))
        }

        async fn battery_alarm_report(&self, event: &str) -> Result<AlarmReport> {
            Ok(AlarmReport {
                event: event.to_string(),
                status: "activ".to_string(),
            })
        }
    }

    struct FakeHealth;

    #[async_trait]
    impl HealthReporter for FakeHealth {
        async fn battery_health_report(&self) -> Result<i64> {
            Ok(95)
        }
    }

    fn service(
        health: Option<Arc<dyn HealthReporter>>,
        publisher: Arc<CapturingPublisher>,
    ) -> BatteryService {
        let spec = ServiceSpecification::new(
            SERVICE_NAME,
            Address::service("zw", "1", SERVICE_NAME, "7"),
        );
        BatteryService::new(
            spec,
            BatteryControllers {
                battery: Arc::new(FakeBattery {
                    level: 80,
                    state: "charging",
                }),
                health,
                sensor: None,
            },
            publisher,
        )
    }

    #[tokio::test]
    async fn test_level_report_carries_state_prop() {
        let publisher = CapturingPublisher::new();
        let svc = service(None, publisher.clone());

        let outcome = svc.send_battery_level_report(false).await.unwrap();
        assert!(outcome.published);

        let msg = publisher.last().unwrap();
        assert_eq!(msg.message_type, EVT_LVL_REPORT);
        assert_eq!(msg.get_int().unwrap(), 80);
        assert_eq!(msg.props.get_string("state"), Some("charging"));
    }

    #[tokio::test]
    async fn test_alarm_report_aggregated_by_event() {
        let publisher = CapturingPublisher::new();
        let svc = service(None, publisher.clone());

        svc.send_battery_alarm_report("low_battery", true)
            .await
            .unwrap();
        let msg = publisher.last().unwrap();
        assert_eq!(msg.message_type, EVT_ALARM_REPORT);
        assert_eq!(msg.storage_strategy, Some(StorageStrategy::Aggregate));
        assert_eq!(msg.storage_strategy_key.as_deref(), Some("low_battery"));
        let map = msg.value.as_str_map().unwrap();
        assert_eq!(map.get("status").map(String::as_str), Some("activ"));
    }

    #[tokio::test]
    async fn test_health_report_requires_capability() {
        let publisher = CapturingPublisher::new();
        let svc = service(None, publisher.clone());
        assert!(matches!(
            svc.send_battery_health_report(true).await,
            Err(Error::Capability(_))
        ));

        let svc = service(Some(Arc::new(FakeHealth)), publisher.clone());
        assert!(svc.send_battery_health_report(true).await.unwrap().published);
    }

    #[test]
    fn test_interface_set_reflects_capabilities() {
        let publisher = CapturingPublisher::new();
        let plain = service(None, publisher.clone());
        assert!(!plain.specification().has_interface(EVT_HEALTH_REPORT));

        let with_health = service(Some(Arc::new(FakeHealth)), publisher);
        assert!(with_health.specification().has_interface(EVT_HEALTH_REPORT));
        assert!(with_health.specification().has_interface(EVT_LVL_REPORT));
        assert!(!with_health.specification().has_interface(EVT_SENSOR_REPORT));
    }

    #[tokio::test]
    async fn test_full_report_object() {
        let publisher = CapturingPublisher::new();
        let svc = service(Some(Arc::new(FakeHealth)), publisher.clone());
        svc.send_battery_full_report(true).await.unwrap();

        let msg = publisher.last().unwrap();
        let report: BatteryFullReport = msg.get_object().unwrap();
        assert_eq!(report.lvl, 80);
        assert_eq!(report.health, Some(95));
        assert_eq!(report.sensor, None);
    }
}
