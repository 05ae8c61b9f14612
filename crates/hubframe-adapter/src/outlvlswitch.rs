//! Out-level-switch service (dimmers, shutters, anything with a level).
//!
//! Besides the bus reports, every published level report is mirrored as a
//! [`LevelEvent`] on the in-process event bus; the virtual-meter listener
//! integrates energy from those.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, ReportOutcome, Service, ServiceBase};
use crate::spec::{props, Interface, ServiceSpecification};
use async_trait::async_trait;
use hubframe_bus::{Address, Message, Publisher, Value, ValueType};
use hubframe_core::{AdapterEvent, Error, EventBus, LevelEvent, Result};
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_NAME: &str = "out_lvl_switch";

pub const CMD_LVL_SET: &str = "cmd.lvl.set";
pub const CMD_LVL_GET_REPORT: &str = "cmd.lvl.get_report";
pub const CMD_LVL_START: &str = "cmd.lvl.start";
pub const CMD_LVL_STOP: &str = "cmd.lvl.stop";
pub const CMD_BINARY_SET: &str = "cmd.binary.set";

pub const EVT_LVL_REPORT: &str = "evt.lvl.report";

pub const PROP_DURATION: &str = "duration";
pub const PROP_START_LVL: &str = "start_lvl";

const DEFAULT_MIN_LVL: i64 = 0;
const DEFAULT_MAX_LVL: i64 = 255;

/// Ramp direction for `cmd.lvl.start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDirection {
    Up,
    Down,
}

impl TransitionDirection {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(Error::Validation(format!(
                "invalid transition direction: {other}"
            ))),
        }
    }
}

/// Parameters of a level ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelTransition {
    pub direction: TransitionDirection,
    pub duration: Option<Duration>,
    pub start_level: Option<i64>,
}

/// Mandatory vendor interface.
#[async_trait]
pub trait LevelSwitchController: Send + Sync {
    async fn level_switch_level_report(&self) -> Result<i64>;
    async fn set_level_switch_level(&self, level: i64, duration: Option<Duration>) -> Result<()>;
    async fn set_level_switch_binary_state(&self, on: bool) -> Result<()>;
}

/// Optional ramping capability.
#[async_trait]
pub trait LevelTransitionController: Send + Sync {
    async fn start_level_transition(&self, transition: LevelTransition) -> Result<()>;
    async fn stop_level_transition(&self) -> Result<()>;
}

pub struct LevelSwitchControllers {
    pub switch: Arc<dyn LevelSwitchController>,
    pub transition: Option<Arc<dyn LevelTransitionController>>,
}

pub struct OutLvlSwitchService {
    base: ServiceBase,
    controllers: LevelSwitchControllers,
    event_bus: EventBus,
}

impl OutLvlSwitchService {
    pub fn new(
        mut spec: ServiceSpecification,
        controllers: LevelSwitchControllers,
        publisher: Arc<dyn Publisher>,
        event_bus: EventBus,
    ) -> Self {
        spec.ensure_interfaces(vec![
            Interface::cmd(CMD_LVL_SET, ValueType::Int),
            Interface::cmd(CMD_LVL_GET_REPORT, ValueType::Null),
            Interface::cmd(CMD_BINARY_SET, ValueType::Bool),
            Interface::evt(EVT_LVL_REPORT, ValueType::Int),
        ]);
        if controllers.transition.is_some() {
            spec.ensure_interfaces(vec![
                Interface::cmd(CMD_LVL_START, ValueType::String),
                Interface::cmd(CMD_LVL_STOP, ValueType::Null),
            ]);
        }
        Self {
            base: ServiceBase::new(spec, publisher),
            controllers,
            event_bus,
        }
    }

    /// Declared top of the level range, `255` when absent.
    pub fn max_level(&self) -> i64 {
        self.base
            .specification()
            .prop_int(props::MAX_LVL)
            .unwrap_or(DEFAULT_MAX_LVL)
    }

    /// Declared bottom of the level range, `0` when absent.
    pub fn min_level(&self) -> i64 {
        self.base
            .specification()
            .prop_int(props::MIN_LVL)
            .unwrap_or(DEFAULT_MIN_LVL)
    }

    /// Set the level. The duration is forwarded only when the service
    /// declares `support_duration`.
    pub async fn set_level(&self, level: i64, duration: Option<Duration>) -> Result<()> {
        let duration = if self.base.specification().prop_bool(props::SUPPORT_DURATION) {
            duration
        } else {
            None
        };
        let _guard = self.base.serialize().await;
        self.controllers.switch.set_level_switch_level(level, duration).await
    }

    pub async fn set_binary_state(&self, on: bool) -> Result<()> {
        let _guard = self.base.serialize().await;
        self.controllers.switch.set_level_switch_binary_state(on).await
    }

    /// Begin ramping. Optional parameters are dropped unless the matching
    /// support flag is declared; a start level must lie inside the declared
    /// range.
    pub async fn start_transition(&self, mut transition: LevelTransition) -> Result<()> {
        let controller = self
            .controllers
            .transition
            .as_ref()
            .ok_or_else(|| Error::Capability("level transition".to_string()))?;
        let spec = self.base.specification();
        if !spec.prop_bool(props::SUPPORT_DURATION) {
            transition.duration = None;
        }
        if !spec.prop_bool(props::SUPPORT_START_LEVEL) {
            transition.start_level = None;
        }
        if let Some(start) = transition.start_level {
            if start < self.min_level() || start > self.max_level() {
                return Err(Error::Validation(format!(
                    "start level {start} outside [{}, {}]",
                    self.min_level(),
                    self.max_level()
                )));
            }
        }
        let _guard = self.base.serialize().await;
        controller.start_level_transition(transition).await
    }

    pub async fn stop_transition(&self) -> Result<()> {
        let controller = self
            .controllers
            .transition
            .as_ref()
            .ok_or_else(|| Error::Capability("level transition".to_string()))?;
        let _guard = self.base.serialize().await;
        controller.stop_level_transition().await
    }

    /// Publish `evt.lvl.report` and, when it actually went out, mirror it
    /// as a [`LevelEvent`] on the event bus.
    pub async fn send_level_report(&self, force: bool) -> Result<ReportOutcome> {
        let _guard = self.base.serialize().await;
        let level = self.controllers.switch.level_switch_level_report().await?;
        let outcome = self
            .base
            .publish_report(EVT_LVL_REPORT, "", Value::Int(level), force, |m| m)
            .await?;
        if outcome.published {
            self.event_bus.publish(
                AdapterEvent::Level(LevelEvent {
                    address: self.thing_address().to_string(),
                    level,
                    has_changed: outcome.changed,
                }),
                SERVICE_NAME,
            );
        }
        Ok(outcome)
    }
}

impl Service for OutLvlSwitchService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn duration_prop(message: &Message) -> Result<Option<Duration>> {
    Ok(message
        .props
        .get_int(PROP_DURATION)?
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs as u64)))
}

struct LevelSwitchCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for LevelSwitchCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let switch = as_capability::<OutLvlSwitchService>(&service)?;

        match message.message_type.as_str() {
            CMD_LVL_SET => {
                switch
                    .set_level(message.get_int()?, duration_prop(message)?)
                    .await?;
                switch.send_level_report(true).await?;
            }
            CMD_BINARY_SET => {
                switch.set_binary_state(message.get_bool()?).await?;
                switch.send_level_report(true).await?;
            }
            CMD_LVL_START => {
                let transition = LevelTransition {
                    direction: TransitionDirection::parse(message.get_string()?)?,
                    duration: duration_prop(message)?,
                    start_level: message.props.get_int(PROP_START_LVL)?,
                };
                switch.start_transition(transition).await?;
                switch.send_level_report(true).await?;
            }
            CMD_LVL_STOP => {
                switch.stop_transition().await?;
                switch.send_level_report(true).await?;
            }
            CMD_LVL_GET_REPORT => {
                switch.send_level_report(true).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported level switch command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for the out-level-switch service.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(LevelSwitchCommandHandler { registry });
    [
        CMD_LVL_SET,
        CMD_LVL_GET_REPORT,
        CMD_LVL_START,
        CMD_LVL_STOP,
        CMD_BINARY_SET,
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
    struct FakeSwitch {
        level: Mutex<i64>,
        last_set: Mutex<Option<(i64, Option<Duration>)>>,
        transitions: Mutex<Vec<LevelTransition>>,
    }

    #[async_trait]
    impl LevelSwitchController for FakeSwitch {
        async fn level_switch_level_report(&self) -> Result<i64> {
            Ok(*self.level.lock())
        }

        async fn set_level_switch_level(
            &self,
            level: i64,
            duration: Option<Duration>,
        ) -> Result<()> {
            *self.last_set.lock() = Some((level, duration));
            *self.level.lock() = level;
            Ok(())
        }

        async fn set_level_switch_binary_state(&self, on: bool) -> Result<()> {
            *self.level.lock() = if on { 99 } else { 0 };
            Ok(())
        }
    }

    #[async_trait]
    impl LevelTransitionController for FakeSwitch {
        async fn start_level_transition(&self, transition: LevelTransition) -> Result<()> {
            self.transitions.lock().push(transition);
            Ok(())
        }

        async fn stop_level_transition(&self) -> Result<()> {
            Ok(())
        }
    }

    fn service(
        controller: Arc<FakeSwitch>,
        publisher: Arc<CapturingPublisher>,
        bus: EventBus,
        support_duration: bool,
    ) -> OutLvlSwitchService {
        let spec = ServiceSpecification::new(
            SERVICE_NAME,
            Address::service("zw", "1", SERVICE_NAME, "3"),
        )
        .with_prop(props::MAX_LVL, serde_json::json!(99))
        .with_prop(props::SUPPORT_DURATION, serde_json::json!(support_duration))
        .with_prop(props::SUPPORT_START_LEVEL, serde_json::json!(true));
        OutLvlSwitchService::new(
            spec,
            LevelSwitchControllers {
                switch: controller.clone(),
                transition: Some(controller),
            },
            publisher,
            bus,
        )
    }

    #[tokio::test]
    async fn test_duration_forwarded_only_when_supported() {
        let controller = Arc::new(FakeSwitch::default());
        let svc = service(
            controller.clone(),
            CapturingPublisher::new(),
            EventBus::new(),
            false,
        );
        svc.set_level(50, Some(Duration::from_secs(3))).await.unwrap();
        assert_eq!(*controller.last_set.lock(), Some((50, None)));

        let svc = service(
            controller.clone(),
            CapturingPublisher::new(),
            EventBus::new(),
            true,
        );
        svc.set_level(50, Some(Duration::from_secs(3))).await.unwrap();
        assert_eq!(
            *controller.last_set.lock(),
            Some((50, Some(Duration::from_secs(3))))
        );
    }

    #[tokio::test]
    async fn test_start_level_validated_against_range() {
        let controller = Arc::new(FakeSwitch::default());
        let svc = service(controller, CapturingPublisher::new(), EventBus::new(), true);
        let transition = LevelTransition {
            direction: TransitionDirection::Up,
            duration: None,
            start_level: Some(150),
        };
        assert!(matches!(
            svc.start_transition(transition).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_published_level_report_mirrors_to_event_bus() {
        let controller = Arc::new(FakeSwitch::default());
        let publisher = CapturingPublisher::new();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let svc = service(controller.clone(), publisher.clone(), bus, true);

        *controller.level.lock() = 42;
        svc.send_level_report(false).await.unwrap();
        let (event, _) = rx.recv().await.unwrap();
        match event {
            AdapterEvent::Level(e) => {
                assert_eq!(e.address, "3");
                assert_eq!(e.level, 42);
                assert!(e.has_changed);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Suppressed report: no bus event either.
        svc.send_level_report(false).await.unwrap();
        assert!(rx.try_recv().is_none());
        assert_eq!(publisher.count(), 1);
    }

    #[tokio::test]
    async fn test_routed_transition_start_forces_level_report() {
        use crate::registry::AdapterRegistry;
        use crate::router::Router;

        let publisher = CapturingPublisher::new();
        let bus = EventBus::new();
        let registry = Arc::new(AdapterRegistry::new(
            "zw",
            "1",
            publisher.clone(),
            bus.clone(),
        ));
        registry
            .register_thing("3", vec!["ch_0".to_string()], Default::default())
            .await
            .unwrap();
        let controller = Arc::new(FakeSwitch::default());
        *controller.level.lock() = 30;
        let svc = Arc::new(service(controller.clone(), publisher.clone(), bus, true));
        registry.add_service("3", svc).await.unwrap();

        let mut router = Router::new(publisher.clone());
        router.add_all(routings(registry));

        let mut cmd = Message::string(SERVICE_NAME, CMD_LVL_START, "up");
        cmd.topic = Some(format!(
            "pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:{SERVICE_NAME}/ad:3"
        ));
        router.route(cmd).await;

        assert_eq!(controller.transitions.lock().len(), 1);
        let reports: Vec<_> = publisher
            .take()
            .into_iter()
            .filter(|(_, m)| m.message_type == EVT_LVL_REPORT)
            .collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.get_int().unwrap(), 30);
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!(
            TransitionDirection::parse("up").unwrap(),
            TransitionDirection::Up
        );
        assert!(TransitionDirection::parse("sideways").is_err());
    }
}
