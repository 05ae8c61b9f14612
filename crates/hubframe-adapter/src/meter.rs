//! Numeric meter services.
//!
//! Covers every `meter_*` service (electricity, gas, water). Units come
//! from the `sup_units` declaration; each unit reports independently
//! through the cache. The extended report is one float-map event and is
//! cache-filtered as a whole: required as soon as any entry requires it.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, ReportOutcome, Service, ServiceBase};
use crate::spec::{props, Interface, ServiceSpecification};
use async_trait::async_trait;
use hubframe_bus::{Address, Message, Publisher, StorageStrategy, Value, ValueType};
use hubframe_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// All numeric meter services share this name prefix.
pub const SERVICE_PREFIX: &str = "meter_";

/// An unchanged meter value is re-published every 30 minutes by default.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub const CMD_METER_GET_REPORT: &str = "cmd.meter.get_report";
pub const CMD_METER_EXPORT_GET_REPORT: &str = "cmd.meter_export.get_report";
pub const CMD_METER_EXT_GET_REPORT: &str = "cmd.meter_ext.get_report";
pub const CMD_METER_RESET: &str = "cmd.meter.reset";

pub const EVT_METER_REPORT: &str = "evt.meter.report";
pub const EVT_METER_EXPORT_REPORT: &str = "evt.meter_export.report";
pub const EVT_METER_EXT_REPORT: &str = "evt.meter_ext.report";

/// Mandatory vendor interface: one reading per supported unit.
#[async_trait]
pub trait MeterReporter: Send + Sync {
    async fn meter_report(&self, unit: &str) -> Result<f64>;
}

/// Optional export metering (energy fed back to the grid).
#[async_trait]
pub trait MeterExportReporter: Send + Sync {
    async fn meter_export_report(&self, unit: &str) -> Result<f64>;
}

/// Optional extended metering: named values read in one vendor call.
#[async_trait]
pub trait MeterExtendedReporter: Send + Sync {
    async fn meter_extended_report(&self, values: &[String]) -> Result<HashMap<String, f64>>;
}

/// Optional accumulated-value reset.
#[async_trait]
pub trait MeterResetController: Send + Sync {
    async fn meter_reset(&self) -> Result<()>;
}

pub struct MeterControllers {
    pub reporter: Arc<dyn MeterReporter>,
    pub export: Option<Arc<dyn MeterExportReporter>>,
    pub extended: Option<Arc<dyn MeterExtendedReporter>>,
    pub reset: Option<Arc<dyn MeterResetController>>,
}

pub struct MeterService {
    base: ServiceBase,
    controllers: MeterControllers,
}

impl MeterService {
    pub fn new(
        mut spec: ServiceSpecification,
        controllers: MeterControllers,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        spec.ensure_interfaces(vec![
            Interface::cmd(CMD_METER_GET_REPORT, ValueType::String),
            Interface::evt(EVT_METER_REPORT, ValueType::Float),
        ]);
        if controllers.export.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_METER_EXPORT_GET_REPORT, ValueType::String),
                Interface::evt(EVT_METER_EXPORT_REPORT, ValueType::Float),
            ]);
        }
        if controllers.extended.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_METER_EXT_GET_REPORT, ValueType::StrArray),
                Interface::evt(EVT_METER_EXT_REPORT, ValueType::FloatMap),
            ]);
        }
        if controllers.reset.is_some() {
            spec.ensure_interfaces(vec![Interface::cmd(CMD_METER_RESET, ValueType::Null)]);
        }
        Self {
            base: ServiceBase::new(spec, publisher)
                .with_strategy(crate::cache::ReportingStrategy::ReportAtLeastEvery(
                    DEFAULT_REPORT_INTERVAL,
                )),
            controllers,
        }
    }

    /// Resolve the requested unit (or all declared units for `None`).
    fn resolve_units(&self, key: &str, requested: Option<&str>) -> Result<Vec<String>> {
        let declared = self.base.specification().require_str_array(key)?;
        match requested {
            None => Ok(declared),
            Some(unit) => {
                let canonical = self
                    .base
                    .specification()
                    .normalize_against(key, unit)
                    .ok_or_else(|| Error::Validation(format!("unsupported unit: {unit}")))?;
                Ok(vec![canonical])
            }
        }
    }

    fn is_virtual(&self) -> bool {
        self.base.specification().prop_bool(props::IS_VIRTUAL)
    }

    /// Publish `evt.meter.report` for the requested unit, or every declared
    /// unit when `unit` is `None`.
    pub async fn send_meter_report(&self, unit: Option<&str>, force: bool) -> Result<ReportOutcome> {
        let units = self.resolve_units(props::SUP_UNITS, unit)?;
        let is_virtual = self.is_virtual();
        let _guard = self.base.serialize().await;
        let mut outcome = ReportOutcome::SKIPPED;
        for unit in units {
            let reading = self.controllers.reporter.meter_report(&unit).await?;
            let one = self
                .base
                .publish_report(EVT_METER_REPORT, &unit, Value::Float(reading), force, |m| {
                    m.with_prop("unit", unit.clone())
                        .with_prop("is_virtual", is_virtual.to_string())
                        .with_storage_strategy(StorageStrategy::Aggregate, Some(unit.clone()))
                })
                .await?;
            outcome.published |= one.published;
            outcome.changed |= one.changed;
        }
        Ok(outcome)
    }

    pub async fn send_export_report(
        &self,
        unit: Option<&str>,
        force: bool,
    ) -> Result<ReportOutcome> {
        let export = self
            .controllers
            .export
            .as_ref()
            .ok_or_else(|| Error::Capability("export metering".to_string()))?;
        let units = self.resolve_units(props::SUP_EXPORT_UNITS, unit)?;
        let _guard = self.base.serialize().await;
        let mut outcome = ReportOutcome::SKIPPED;
        for unit in units {
            let reading = export.meter_export_report(&unit).await?;
            let one = self
                .base
                .publish_report(
                    EVT_METER_EXPORT_REPORT,
                    &unit,
                    Value::Float(reading),
                    force,
                    |m| {
                        m.with_prop("unit", unit.clone())
                            .with_storage_strategy(StorageStrategy::Aggregate, Some(unit.clone()))
                    },
                )
                .await?;
            outcome.published |= one.published;
            outcome.changed |= one.changed;
        }
        Ok(outcome)
    }

    /// Publish `evt.meter_ext.report` for the requested value names, or all
    /// declared ones for `None`. One float-map event; required if any single
    /// entry requires a report.
    pub async fn send_extended_report(
        &self,
        values: Option<&[String]>,
        force: bool,
    ) -> Result<ReportOutcome> {
        let extended = self
            .controllers
            .extended
            .as_ref()
            .ok_or_else(|| Error::Capability("extended metering".to_string()))?;
        let declared = self
            .base
            .specification()
            .require_str_array(props::SUP_EXTENDED_VALS)?;
        let requested = match values {
            None => declared,
            Some(names) => {
                for name in names {
                    if !declared.iter().any(|d| d == name) {
                        return Err(Error::Validation(format!(
                            "unsupported extended value: {name}"
                        )));
                    }
                }
                names.to_vec()
            }
        };

        let _guard = self.base.serialize().await;
        let readings = extended.meter_extended_report(&requested).await?;

        let required = force
            || readings.iter().any(|(name, value)| {
                self.base.cache().report_required(
                    self.base.strategy(),
                    EVT_METER_EXT_REPORT,
                    name,
                    &Value::Float(*value),
                )
            });
        let changed = readings.iter().any(|(name, value)| {
            self.base
                .cache()
                .has_changed(EVT_METER_EXT_REPORT, name, &Value::Float(*value))
        });
        if !required {
            return Ok(ReportOutcome {
                published: false,
                changed,
            });
        }

        let message = Message::float_map(
            self.base.name().to_string(),
            EVT_METER_EXT_REPORT,
            readings.clone(),
        )
        .with_storage_strategy(StorageStrategy::Split, None);
        self.base.send_message(message).await?;
        for (name, value) in readings {
            self.base
                .cache()
                .reported(EVT_METER_EXT_REPORT, &name, Value::Float(value));
        }
        Ok(ReportOutcome {
            published: true,
            changed,
        })
    }

    /// Reset accumulated values; requires the reset capability.
    pub async fn reset(&self) -> Result<()> {
        let controller = self
            .controllers
            .reset
            .as_ref()
            .ok_or_else(|| Error::Capability("meter reset".to_string()))?;
        let _guard = self.base.serialize().await;
        controller.meter_reset().await
    }
}

impl Service for MeterService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Null payload means "all declared"; otherwise the payload is one unit.
fn optional_unit(message: &Message) -> Result<Option<&str>> {
    if message.value.is_null() {
        Ok(None)
    } else {
        message.get_string().map(Some)
    }
}

struct MeterCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for MeterCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let meter = as_capability::<MeterService>(&service)?;

        match message.message_type.as_str() {
            CMD_METER_GET_REPORT => {
                meter.send_meter_report(optional_unit(message)?, true).await?;
            }
            CMD_METER_EXPORT_GET_REPORT => {
                meter.send_export_report(optional_unit(message)?, true).await?;
            }
            CMD_METER_EXT_GET_REPORT => {
                let values = if message.value.is_null() {
                    None
                } else {
                    Some(message.get_str_array()?)
                };
                meter.send_extended_report(values, true).await?;
            }
            CMD_METER_RESET => {
                meter.reset().await?;
                meter.send_meter_report(None, true).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported meter command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for all `meter_*` services.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(MeterCommandHandler { registry });
    [
        CMD_METER_GET_REPORT,
        CMD_METER_EXPORT_GET_REPORT,
        CMD_METER_EXT_GET_REPORT,
        CMD_METER_RESET,
    ]
    .into_iter()
    .map(|cmd| {
        Routing::new(handler.clone())
            .for_service_prefix(SERVICE_PREFIX)
            .for_type(cmd)
    })
    .collect()
}
