//! Chargepoint service.
//!
//! The charging state machine itself belongs to the vendor; this service
//! validates commands against the declared capability set, calls the
//! controller and publishes the follow-up reports.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, ReportOutcome, Service, ServiceBase};
use crate::spec::{props, Interface, ServiceSpecification};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use hubframe_bus::{Address, Message, Publisher, Value, ValueType};
use hubframe_core::{Error, Result};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "chargepoint";

/// Default lower bound for offered/max current in amperes.
const DEFAULT_MIN_CURRENT: i64 = 6;

pub const CMD_CHARGE_START: &str = "cmd.charge.start";
pub const CMD_CHARGE_STOP: &str = "cmd.charge.stop";
pub const CMD_STATE_GET_REPORT: &str = "cmd.state.get_report";
pub const CMD_CABLE_LOCK_SET: &str = "cmd.cable_lock.set";
pub const CMD_CABLE_LOCK_GET_REPORT: &str = "cmd.cable_lock.get_report";
pub const CMD_CURRENT_SESSION_SET_CURRENT: &str = "cmd.current_session.set_current";
pub const CMD_CURRENT_SESSION_GET_REPORT: &str = "cmd.current_session.get_report";
pub const CMD_MAX_CURRENT_SET: &str = "cmd.max_current.set";
pub const CMD_MAX_CURRENT_GET_REPORT: &str = "cmd.max_current.get_report";
pub const CMD_PHASE_MODE_SET: &str = "cmd.phase_mode.set";
pub const CMD_PHASE_MODE_GET_REPORT: &str = "cmd.phase_mode.get_report";

pub const EVT_STATE_REPORT: &str = "evt.state.report";
pub const EVT_CURRENT_SESSION_REPORT: &str = "evt.current_session.report";
pub const EVT_CABLE_LOCK_REPORT: &str = "evt.cable_lock.report";
pub const EVT_MAX_CURRENT_REPORT: &str = "evt.max_current.report";
pub const EVT_PHASE_MODE_REPORT: &str = "evt.phase_mode.report";

/// Property consumed by `cmd.charge.start`.
pub const PROP_CHARGING_MODE: &str = "charging_mode";

/// Settings handed to the vendor on charge start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChargingSettings {
    /// Canonical charging mode, when the service declares a mode set.
    pub mode: Option<String>,
}

/// Vendor-side view of the running (or last) charging session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    /// Energy of the current session, kWh.
    pub session_energy: f64,
    /// Energy of the previous session, kWh; 0 when unknown.
    pub previous_session: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Currently offered current, amperes; 0 when not applicable.
    pub offered_current: i64,
}

/// Mandatory vendor interface.
#[async_trait]
pub trait ChargepointController: Send + Sync {
    async fn start_chargepoint_charging(&self, settings: &ChargingSettings) -> Result<()>;
    async fn stop_chargepoint_charging(&self) -> Result<()>;
    async fn chargepoint_state_report(&self) -> Result<String>;
    async fn chargepoint_current_session_report(&self) -> Result<SessionReport>;
}

/// Optional cable-lock capability.
#[async_trait]
pub trait CableLockController: Send + Sync {
    async fn set_chargepoint_cable_lock(&self, locked: bool) -> Result<()>;
    async fn chargepoint_cable_lock_report(&self) -> Result<bool>;
}

/// Optional adjustable-max-current capability.
#[async_trait]
pub trait MaxCurrentController: Send + Sync {
    async fn set_chargepoint_max_current(&self, current: i64) -> Result<()>;
    async fn chargepoint_max_current_report(&self) -> Result<i64>;
}

/// Optional adjustable-offered-current capability.
#[async_trait]
pub trait OfferedCurrentController: Send + Sync {
    async fn set_chargepoint_offered_current(&self, current: i64) -> Result<()>;
}

/// Optional phase-mode capability.
#[async_trait]
pub trait PhaseModeController: Send + Sync {
    async fn set_chargepoint_phase_mode(&self, mode: &str) -> Result<()>;
    async fn chargepoint_phase_mode_report(&self) -> Result<String>;
}

/// Controller bundle; the filled slots decide the interface set.
pub struct ChargepointControllers {
    pub chargepoint: Arc<dyn ChargepointController>,
    pub cable_lock: Option<Arc<dyn CableLockController>>,
    pub max_current: Option<Arc<dyn MaxCurrentController>>,
    pub offered_current: Option<Arc<dyn OfferedCurrentController>>,
    pub phase_mode: Option<Arc<dyn PhaseModeController>>,
}

pub struct ChargepointService {
    base: ServiceBase,
    controllers: ChargepointControllers,
}

impl ChargepointService {
    pub fn new(
        mut spec: ServiceSpecification,
        controllers: ChargepointControllers,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        spec.ensure_interfaces(vec![
            Interface::cmd(CMD_CHARGE_START, ValueType::Null),
            Interface::cmd(CMD_CHARGE_STOP, ValueType::Null),
            Interface::cmd(CMD_STATE_GET_REPORT, ValueType::Null),
            Interface::evt(EVT_STATE_REPORT, ValueType::String),
            Interface::cmd(CMD_CURRENT_SESSION_GET_REPORT, ValueType::Null),
            Interface::evt(EVT_CURRENT_SESSION_REPORT, ValueType::Float),
        ]);
        if controllers.cable_lock.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_CABLE_LOCK_SET, ValueType::Bool),
                Interface::cmd(CMD_CABLE_LOCK_GET_REPORT, ValueType::Null),
                Interface::evt(EVT_CABLE_LOCK_REPORT, ValueType::Bool),
            ]);
        }
        if controllers.max_current.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_MAX_CURRENT_SET, ValueType::Int),
                Interface::cmd(CMD_MAX_CURRENT_GET_REPORT, ValueType::Null),
                Interface::evt(EVT_MAX_CURRENT_REPORT, ValueType::Int),
            ]);
        }
        if controllers.offered_current.is_some() {
            spec.ensure_interfaces(vec![Interface::cmd(
                CMD_CURRENT_SESSION_SET_CURRENT,
                ValueType::Int,
            )]);
        }
        if controllers.phase_mode.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_PHASE_MODE_SET, ValueType::String),
                Interface::cmd(CMD_PHASE_MODE_GET_REPORT, ValueType::Null),
                Interface::evt(EVT_PHASE_MODE_REPORT, ValueType::String),
            ]);
        }
        Self {
            base: ServiceBase::new(spec, publisher),
            controllers,
        }
    }

    /// Whether the service can adjust the offered current.
    fn supports_adjustable_current(&self) -> bool {
        self.controllers.offered_current.is_some()
            && self
                .base
                .specification()
                .prop_int(props::SUP_MAX_CURRENT)
                .is_some()
    }

    fn current_bounds(&self) -> Result<(i64, i64)> {
        let spec = self.base.specification();
        let max = spec.prop_int(props::SUP_MAX_CURRENT).ok_or_else(|| {
            Error::Validation(format!(
                "service {} does not declare {}",
                spec.name,
                props::SUP_MAX_CURRENT
            ))
        })?;
        let min = spec.prop_int(props::MIN_CURRENT).unwrap_or(DEFAULT_MIN_CURRENT);
        Ok((min, max))
    }

    /// Start charging. When a mode set is declared, `charging_mode` must
    /// match it case-insensitively and is normalised to the declared form;
    /// without a declared set the property passes through untouched.
    pub async fn start_charging(&self, charging_mode: Option<&str>) -> Result<()> {
        let spec = self.base.specification();
        let declared = spec.prop_str_array(props::SUP_CHARGING_MODES);
        let mode = if declared.is_empty() {
            charging_mode.map(str::to_string)
        } else {
            let candidate = charging_mode
                .filter(|m| !m.is_empty())
                .ok_or_else(|| Error::Validation("charging_mode property is required".to_string()))?;
            Some(
                spec.normalize_against(props::SUP_CHARGING_MODES, candidate)
                    .ok_or_else(|| {
                        Error::Validation(format!("unsupported charging mode: {candidate}"))
                    })?,
            )
        };

        let _guard = self.base.serialize().await;
        self.controllers
            .chargepoint
            .start_chargepoint_charging(&ChargingSettings { mode })
            .await
    }

    pub async fn stop_charging(&self) -> Result<()> {
        let _guard = self.base.serialize().await;
        self.controllers.chargepoint.stop_chargepoint_charging().await
    }

    /// Lock or unlock the cable; requires the cable-lock capability.
    pub async fn set_cable_lock(&self, locked: bool) -> Result<()> {
        let controller = self
            .controllers
            .cable_lock
            .as_ref()
            .ok_or_else(|| Error::Capability("cable lock".to_string()))?;
        let _guard = self.base.serialize().await;
        controller.set_chargepoint_cable_lock(locked).await
    }

    /// Offer a current to the car, clamped to `[min, declared max]`.
    pub async fn set_offered_current(&self, current: i64) -> Result<()> {
        let controller = self
            .controllers
            .offered_current
            .as_ref()
            .ok_or_else(|| Error::Capability("adjustable offered current".to_string()))?;
        let (min, max) = self.current_bounds()?;
        let clamped = current.clamp(min, max);
        let _guard = self.base.serialize().await;
        controller.set_chargepoint_offered_current(clamped).await
    }

    /// Set the chargepoint's max current, clamped to `[min, declared max]`.
    pub async fn set_max_current(&self, current: i64) -> Result<()> {
        let controller = self
            .controllers
            .max_current
            .as_ref()
            .ok_or_else(|| Error::Capability("adjustable max current".to_string()))?;
        let (min, max) = self.current_bounds()?;
        let clamped = current.clamp(min, max);
        let _guard = self.base.serialize().await;
        controller.set_chargepoint_max_current(clamped).await
    }

    /// Switch phase mode; the value must be in the declared set.
    pub async fn set_phase_mode(&self, mode: &str) -> Result<()> {
        let controller = self
            .controllers
            .phase_mode
            .as_ref()
            .ok_or_else(|| Error::Capability("adjustable phase mode".to_string()))?;
        let declared = self
            .base
            .specification()
            .require_str_array(props::SUP_PHASE_MODES)?;
        if !declared.iter().any(|m| m == mode) {
            return Err(Error::Validation(format!("unsupported phase mode: {mode}")));
        }
        let _guard = self.base.serialize().await;
        controller.set_chargepoint_phase_mode(mode).await
    }

    pub async fn send_state_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let state = self.controllers.chargepoint.chargepoint_state_report().await?;
        self.base
            .publish_report(EVT_STATE_REPORT, "", Value::String(state), force, |m| m)
            .await
    }

    /// Publish `evt.current_session.report`. Conditional properties:
    /// `offered_current` only with the adjustable-current capability,
    /// `previous_session` only when non-zero, timestamps only when set.
    pub async fn send_current_session_report(&self, force: bool) -> Result<ReportOutcome> {
        let supports_current = self.supports_adjustable_current();
        let _guard = self.base.serialize().await;
        let report = self
            .controllers
            .chargepoint
            .chargepoint_current_session_report()
            .await?;
        self.base
            .publish_report(
                EVT_CURRENT_SESSION_REPORT,
                "",
                Value::Float(report.session_energy),
                force,
                |mut m| {
                    if supports_current {
                        m = m.with_prop("offered_current", report.offered_current.to_string());
                    }
                    if report.previous_session != 0.0 {
                        m = m.with_prop("previous_session", report.previous_session.to_string());
                    }
                    if let Some(started) = report.started_at {
                        m = m.with_prop(
                            "started_at",
                            started.to_rfc3339_opts(SecondsFormat::Secs, true),
                        );
                    }
                    if let Some(finished) = report.finished_at {
                        m = m.with_prop(
                            "finished_at",
                            finished.to_rfc3339_opts(SecondsFormat::Secs, true),
                        );
                    }
                    m
                },
            )
            .await
    }

    pub async fn send_cable_lock_report(&self, force: bool) -> Result<ReportOutcome> {
        let controller = self
            .controllers
            .cable_lock
            .as_ref()
            .ok_or_else(|| Error::Capability("cable lock".to_string()))?;
        let _guard = self.base.serialize().await;
        let locked = controller.chargepoint_cable_lock_report().await?;
        self.base
            .publish_report(EVT_CABLE_LOCK_REPORT, "", Value::Bool(locked), force, |m| m)
            .await
    }

    pub async fn send_max_current_report(&self, force: bool) -> Result<ReportOutcome> {
        let controller = self
            .controllers
            .max_current
            .as_ref()
            .ok_or_else(|| Error::Capability("adjustable max current".to_string()))?;
        let _guard = self.base.serialize().await;
        let current = controller.chargepoint_max_current_report().await?;
        self.base
            .publish_report(EVT_MAX_CURRENT_REPORT, "", Value::Int(current), force, |m| m)
            .await
    }

    pub async fn send_phase_mode_report(&self, force: bool) -> Result<ReportOutcome> {
        let controller = self
            .controllers
            .phase_mode
            .as_ref()
            .ok_or_else(|| Error::Capability("adjustable phase mode".to_string()))?;
        let _guard = self.base.serialize().await;
        let mode = controller.chargepoint_phase_mode_report().await?;
        self.base
            .publish_report(EVT_PHASE_MODE_REPORT, "", Value::String(mode), force, |m| m)
            .await
    }
}

impl Service for ChargepointService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct ChargepointCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for ChargepointCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let chargepoint = as_capability::<ChargepointService>(&service)?;

        match message.message_type.as_str() {
            CMD_CHARGE_START => {
                chargepoint
                    .start_charging(message.props.get_string(PROP_CHARGING_MODE))
                    .await?;
                chargepoint.send_state_report(true).await?;
                chargepoint.send_current_session_report(true).await?;
            }
            CMD_CHARGE_STOP => {
                chargepoint.stop_charging().await?;
                chargepoint.send_state_report(true).await?;
                chargepoint.send_current_session_report(true).await?;
            }
            CMD_CABLE_LOCK_SET => {
                chargepoint.set_cable_lock(message.get_bool()?).await?;
                chargepoint.send_cable_lock_report(true).await?;
            }
            CMD_CABLE_LOCK_GET_REPORT => {
                chargepoint.send_cable_lock_report(true).await?;
            }
            CMD_CURRENT_SESSION_SET_CURRENT => {
                chargepoint.set_offered_current(message.get_int()?).await?;
                chargepoint.send_current_session_report(true).await?;
            }
            CMD_CURRENT_SESSION_GET_REPORT => {
                chargepoint.send_current_session_report(true).await?;
            }
            CMD_MAX_CURRENT_SET => {
                chargepoint.set_max_current(message.get_int()?).await?;
                chargepoint.send_max_current_report(true).await?;
            }
            CMD_MAX_CURRENT_GET_REPORT => {
                chargepoint.send_max_current_report(true).await?;
            }
            CMD_PHASE_MODE_SET => {
                chargepoint.set_phase_mode(message.get_string()?).await?;
                chargepoint.send_phase_mode_report(true).await?;
            }
            CMD_PHASE_MODE_GET_REPORT => {
                chargepoint.send_phase_mode_report(true).await?;
            }
            CMD_STATE_GET_REPORT => {
                chargepoint.send_state_report(true).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported chargepoint command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for the chargepoint service.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(ChargepointCommandHandler { registry });
    [
        CMD_CHARGE_START,
        CMD_CHARGE_STOP,
        CMD_STATE_GET_REPORT,
        CMD_CABLE_LOCK_SET,
        CMD_CABLE_LOCK_GET_REPORT,
        CMD_CURRENT_SESSION_SET_CURRENT,
        CMD_CURRENT_SESSION_GET_REPORT,
        CMD_MAX_CURRENT_SET,
        CMD_MAX_CURRENT_GET_REPORT,
        CMD_PHASE_MODE_SET,
        CMD_PHASE_MODE_GET_REPORT,
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
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeChargepoint {
        started_with: Mutex<Option<ChargingSettings>>,
        offered: Mutex<Option<i64>>,
        session: Mutex<SessionReport>,
    }

    #[async_trait]
    impl ChargepointController for FakeChargepoint {
        async fn start_chargepoint_charging(&self, settings: &ChargingSettings) -> Result<()> {
            *self.started_with.lock() = Some(settings.clone());
            Ok(())
        }

        async fn stop_chargepoint_charging(&self) -> Result<()> {
            Ok(())
        }

        async fn chargepoint_state_report(&self) -> Result<String> {
            Ok("charging".to_string())
        }

        async fn chargepoint_current_session_report(&self) -> Result<SessionReport> {
            Ok(self.session.lock().clone())
        }
    }

    #[async_trait]
    impl OfferedCurrentController for FakeChargepoint {
        async fn set_chargepoint_offered_current(&self, current: i64) -> Result<()> {
            *self.offered.lock() = Some(current);
            Ok(())
        }
    }

    fn service(
        controller: Arc<FakeChargepoint>,
        publisher: Arc<CapturingPublisher>,
        with_offered: bool,
    ) -> ChargepointService {
        let spec = ServiceSpecification::new(
            SERVICE_NAME,
            Address::service("easee", "1", SERVICE_NAME, "4"),
        )
        .with_prop(
            props::SUP_CHARGING_MODES,
            serde_json::json!(["normal", "slow"]),
        )
        .with_prop(props::SUP_MAX_CURRENT, serde_json::json!(32));

        ChargepointService::new(
            spec,
            ChargepointControllers {
                chargepoint: controller.clone(),
                cable_lock: None,
                max_current: None,
                offered_current: with_offered.then(|| controller as Arc<dyn OfferedCurrentController>),
                phase_mode: None,
            },
            publisher,
        )
    }

    #[tokio::test]
    async fn test_start_normalises_declared_mode() {
        let controller = Arc::new(FakeChargepoint::default());
        let svc = service(controller.clone(), CapturingPublisher::new(), false);

        svc.start_charging(Some("Normal")).await.unwrap();
        assert_eq!(
            controller.started_with.lock().clone().unwrap().mode,
            Some("normal".to_string())
        );
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_mode_before_vendor_call() {
        let controller = Arc::new(FakeChargepoint::default());
        let svc = service(controller.clone(), CapturingPublisher::new(), false);

        assert!(matches!(
            svc.start_charging(Some("dummy")).await,
            Err(Error::Validation(_))
        ));
        assert!(controller.started_with.lock().is_none());
    }

    #[tokio::test]
    async fn test_start_requires_mode_when_declared() {
        let controller = Arc::new(FakeChargepoint::default());
        let svc = service(controller, CapturingPublisher::new(), false);
        assert!(matches!(
            svc.start_charging(None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_offered_current_is_clamped() {
        let controller = Arc::new(FakeChargepoint::default());
        let svc = service(controller.clone(), CapturingPublisher::new(), true);

        svc.set_offered_current(64).await.unwrap();
        assert_eq!(*controller.offered.lock(), Some(32));

        svc.set_offered_current(1).await.unwrap();
        assert_eq!(*controller.offered.lock(), Some(6));
    }

    #[tokio::test]
    async fn test_offered_current_requires_capability() {
        let controller = Arc::new(FakeChargepoint::default());
        let svc = service(controller, CapturingPublisher::new(), false);
        assert!(matches!(
            svc.set_offered_current(10).await,
            Err(Error::Capability(_))
        ));
    }

    #[tokio::test]
    async fn test_session_report_conditional_props() {
        let controller = Arc::new(FakeChargepoint::default());
        let publisher = CapturingPublisher::new();
        let svc = service(controller.clone(), publisher.clone(), true);

        // Empty session: no optional props at all.
        svc.send_current_session_report(true).await.unwrap();
        let msg = publisher.last().unwrap();
        assert_eq!(msg.props.get_string("previous_session"), None);
        assert_eq!(msg.props.get_string("started_at"), None);
        // offered_current is present because the capability is declared.
        assert_eq!(msg.props.get_string("offered_current"), Some("0"));

        let started = Utc::now();
        *controller.session.lock() = SessionReport {
            session_energy: 1.74,
            previous_session: 5.5,
            started_at: Some(started),
            finished_at: None,
            offered_current: 16,
        };
        svc.send_current_session_report(true).await.unwrap();
        let msg = publisher.last().unwrap();
        assert_eq!(msg.get_float().unwrap(), 1.74);
        assert_eq!(msg.props.get_string("previous_session"), Some("5.5"));
        assert!(msg.props.get_string("started_at").is_some());
        assert_eq!(msg.props.get_string("finished_at"), None);
        assert_eq!(msg.props.get_string("offered_current"), Some("16"));
    }

    #[test]
    fn test_interfaces_follow_capabilities() {
        let controller = Arc::new(FakeChargepoint::default());
        let svc = service(controller.clone(), CapturingPublisher::new(), true);
        assert!(svc
            .specification()
            .has_interface(CMD_CURRENT_SESSION_SET_CURRENT));
        assert!(!svc.specification().has_interface(CMD_CABLE_LOCK_SET));

        let svc = service(controller, CapturingPublisher::new(), false);
        assert!(!svc
            .specification()
            .has_interface(CMD_CURRENT_SESSION_SET_CURRENT));
    }
}
