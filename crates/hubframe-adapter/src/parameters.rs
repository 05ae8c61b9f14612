//! Device configuration parameters.
//!
//! Parameters are validated against their specification before the vendor
//! sees them; a bad value is a bus error, never a vendor call. Devices
//! without fixed parameter sizes support discovery: their parameter list is
//! re-published whenever an inclusion report goes out.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, ReportOutcome, Service, ServiceBase};
use crate::spec::{props, Interface, ServiceSpecification};
use async_trait::async_trait;
use hubframe_bus::{Address, Message, Publisher, Value, ValueType};
use hubframe_core::{
    AdapterEvent, Error, EventClass, EventFilter, EventHandler, EventMetadata, EventProcessor,
    Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const SERVICE_NAME: &str = "parameters";

pub const CMD_PARAM_GET_REPORT: &str = "cmd.param.get_report";
pub const CMD_PARAM_SET: &str = "cmd.param.set";
pub const CMD_SUP_PARAMS_GET_REPORT: &str = "cmd.sup_params.get_report";

pub const EVT_PARAM_REPORT: &str = "evt.param.report";
pub const EVT_SUP_PARAMS_REPORT: &str = "evt.sup_params.report";

/// Value types a parameter can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValueType {
    Int,
    String,
    Bool,
    IntArray,
    StringArray,
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    Int(i64),
    String(String),
    Bool(bool),
    IntArray(Vec<i64>),
    StringArray(Vec<String>),
}

impl ParameterValue {
    pub fn value_type(&self) -> ParameterValueType {
        match self {
            ParameterValue::Int(_) => ParameterValueType::Int,
            ParameterValue::String(_) => ParameterValueType::String,
            ParameterValue::Bool(_) => ParameterValueType::Bool,
            ParameterValue::IntArray(_) => ParameterValueType::IntArray,
            ParameterValue::StringArray(_) => ParameterValueType::StringArray,
        }
    }

    fn elements_as_json(&self) -> Option<Vec<serde_json::Value>> {
        match self {
            ParameterValue::IntArray(v) => {
                Some(v.iter().map(|i| serde_json::json!(i)).collect())
            }
            ParameterValue::StringArray(v) => {
                Some(v.iter().map(|s| serde_json::json!(s)).collect())
            }
            _ => None,
        }
    }

    fn scalar_as_json(&self) -> Option<serde_json::Value> {
        match self {
            ParameterValue::Int(v) => Some(serde_json::json!(v)),
            ParameterValue::String(v) => Some(serde_json::json!(v)),
            ParameterValue::Bool(v) => Some(serde_json::json!(v)),
            _ => None,
        }
    }
}

/// One configurable parameter of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    #[serde(flatten)]
    pub value: ParameterValue,
}

/// UI hint deciding which values a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Input,
    Select,
    Multiselect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: serde_json::Value,
}

/// Declarative description of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpecification {
    pub id: String,
    pub value_type: ParameterValueType,
    pub widget_type: WidgetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub read_only: bool,
}

impl ParameterSpecification {
    /// The widget/type compatibility and range rules. Runs before any
    /// vendor call.
    pub fn validate(&self, value: &ParameterValue) -> Result<()> {
        if self.read_only {
            return Err(Error::Validation(format!(
                "parameter {} is read-only",
                self.id
            )));
        }
        let vt = value.value_type();
        match self.widget_type {
            WidgetType::Input => {
                if !matches!(
                    vt,
                    ParameterValueType::Int | ParameterValueType::String | ParameterValueType::Bool
                ) {
                    return Err(self.incompatible(vt));
                }
                if let ParameterValue::Int(v) = value {
                    if self.min.map(|min| *v < min).unwrap_or(false)
                        || self.max.map(|max| *v > max).unwrap_or(false)
                    {
                        return Err(Error::Validation(format!(
                            "parameter {}: value {v} outside [{:?}, {:?}]",
                            self.id, self.min, self.max
                        )));
                    }
                }
            }
            WidgetType::Select => {
                if !matches!(vt, ParameterValueType::Int | ParameterValueType::String) {
                    return Err(self.incompatible(vt));
                }
                let v = value.scalar_as_json().unwrap_or(serde_json::Value::Null);
                if !self.options.iter().any(|o| o.value == v) {
                    return Err(Error::Validation(format!(
                        "parameter {}: {v} is not one of the declared options",
                        self.id
                    )));
                }
            }
            WidgetType::Multiselect => {
                if !matches!(
                    vt,
                    ParameterValueType::IntArray | ParameterValueType::StringArray
                ) {
                    return Err(self.incompatible(vt));
                }
                for v in value.elements_as_json().unwrap_or_default() {
                    if !self.options.iter().any(|o| o.value == v) {
                        return Err(Error::Validation(format!(
                            "parameter {}: {v} is not one of the declared options",
                            self.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn incompatible(&self, vt: ParameterValueType) -> Error {
        Error::Validation(format!(
            "parameter {}: value type {vt:?} is incompatible with widget {:?}",
            self.id, self.widget_type
        ))
    }
}

#[async_trait]
pub trait ParameterController: Send + Sync {
    async fn parameter_specifications(&self) -> Result<Vec<ParameterSpecification>>;
    async fn parameter(&self, id: &str) -> Result<Parameter>;
    async fn set_parameter(&self, parameter: &Parameter) -> Result<()>;
}

pub struct ParametersService {
    base: ServiceBase,
    controller: Arc<dyn ParameterController>,
}

impl ParametersService {
    pub fn new(
        mut spec: ServiceSpecification,
        controller: Arc<dyn ParameterController>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        spec.ensure_interfaces(vec![
            Interface::cmd(CMD_PARAM_GET_REPORT, ValueType::String),
            Interface::cmd(CMD_PARAM_SET, ValueType::Object),
            Interface::cmd(CMD_SUP_PARAMS_GET_REPORT, ValueType::Null),
            Interface::evt(EVT_PARAM_REPORT, ValueType::Object),
            Interface::evt(EVT_SUP_PARAMS_REPORT, ValueType::Object),
        ]);
        Self {
            base: ServiceBase::new(spec, publisher),
            controller,
        }
    }

    /// Devices with fixed parameter sizes are pre-enumerated and cannot be
    /// discovered.
    pub fn supports_discovery(&self) -> bool {
        self.base
            .specification()
            .props
            .get(props::REQ_PARAM_SIZES)
            .map(|v| match v {
                serde_json::Value::Array(a) => a.is_empty(),
                serde_json::Value::Object(o) => o.is_empty(),
                serde_json::Value::Null => true,
                _ => false,
            })
            .unwrap_or(true)
    }

    /// Validate against the declared specification, write, re-read, report.
    pub async fn set_parameter(&self, parameter: &Parameter) -> Result<()> {
        let specs = self.controller.parameter_specifications().await?;
        let spec = specs
            .iter()
            .find(|s| s.id == parameter.id)
            .ok_or_else(|| Error::NotFound(format!("unknown parameter: {}", parameter.id)))?;
        spec.validate(&parameter.value)?;
        let _guard = self.base.serialize().await;
        self.controller.set_parameter(parameter).await
    }

    pub async fn send_param_report(&self, id: &str, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let parameter = self.controller.parameter(id).await?;
        let value = Value::Object(serde_json::to_value(&parameter)?);
        self.base
            .publish_report(EVT_PARAM_REPORT, id, value, force, |m| m)
            .await
    }

    pub async fn send_sup_params_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let specs = self.controller.parameter_specifications().await?;
        let value = Value::Object(serde_json::to_value(&specs)?);
        self.base
            .publish_report(EVT_SUP_PARAMS_REPORT, "", value, force, |m| m)
            .await
    }
}

impl Service for ParametersService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct ParametersCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for ParametersCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let parameters = as_capability::<ParametersService>(&service)?;

        match message.message_type.as_str() {
            CMD_PARAM_GET_REPORT => {
                parameters.send_param_report(message.get_string()?, true).await?;
            }
            CMD_PARAM_SET => {
                let parameter: Parameter = message.get_object()?;
                parameters.set_parameter(&parameter).await?;
                parameters.send_param_report(&parameter.id, true).await?;
            }
            CMD_SUP_PARAMS_GET_REPORT => {
                parameters.send_sup_params_report(true).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported parameters command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for the parameters service.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(ParametersCommandHandler { registry });
    [CMD_PARAM_GET_REPORT, CMD_PARAM_SET, CMD_SUP_PARAMS_GET_REPORT]
        .into_iter()
        .map(|cmd| {
            Routing::new(handler.clone())
                .for_service(SERVICE_NAME)
                .for_type(cmd)
        })
        .collect()
}

struct DiscoveryProcessor {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl EventProcessor for DiscoveryProcessor {
    async fn process(&self, event: AdapterEvent, _meta: EventMetadata) {
        let thing_address = event.address().to_string();
        for service in self.registry.services_by_name(SERVICE_NAME).await {
            if service.thing_address() != thing_address {
                continue;
            }
            let Ok(parameters) = as_capability::<ParametersService>(&service) else {
                continue;
            };
            if !parameters.supports_discovery() {
                continue;
            }
            if let Err(e) = parameters.send_sup_params_report(true).await {
                warn!(thing = %thing_address, error = %e, "parameter discovery report failed");
            }
        }
    }
}

/// Event-bus handler re-publishing the parameter list after each inclusion
/// report, for things supporting discovery.
pub fn discovery_handler(registry: Arc<dyn Registry>) -> EventHandler {
    EventHandler::new(
        "parameters-discovery",
        EventFilter::Class(EventClass::InclusionReportSent),
        Arc::new(DiscoveryProcessor { registry }),
    )
}
