//! Dev-sys service: device maintenance commands.

use crate::registry::Registry;
use crate::router::{MessageHandler, Routing};
use crate::service::{as_capability, Service, ServiceBase};
use crate::spec::{Interface, ServiceSpecification};
use async_trait::async_trait;
use hubframe_bus::{Address, Message, Publisher, ValueType};
use hubframe_core::{Error, Result};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "dev_sys";

pub const CMD_THING_REBOOT: &str = "cmd.thing.reboot";

#[async_trait]
pub trait RebootController: Send + Sync {
    async fn reboot_device(&self, hard: bool) -> Result<()>;
}

pub struct DevSysService {
    base: ServiceBase,
    reboot: Arc<dyn RebootController>,
}

impl DevSysService {
    pub fn new(
        mut spec: ServiceSpecification,
        reboot: Arc<dyn RebootController>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        spec.ensure_interfaces(vec![Interface::cmd(CMD_THING_REBOOT, ValueType::Bool)]);
        Self {
            base: ServiceBase::new(spec, publisher),
            reboot,
        }
    }

    pub async fn reboot(&self, hard: bool) -> Result<()> {
        let _guard = self.base.serialize().await;
        self.reboot.reboot_device(hard).await
    }
}

impl Service for DevSysService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct DevSysCommandHandler {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl MessageHandler for DevSysCommandHandler {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>> {
        let topic = address.to_topic();
        let service = self
            .registry
            .service_by_topic(&topic)
            .await
            .ok_or_else(|| Error::NotFound(format!("no service at {topic}")))?;
        let dev_sys = as_capability::<DevSysService>(&service)?;

        match message.message_type.as_str() {
            CMD_THING_REBOOT => {
                // Older clients send a null payload; anything that is not a
                // bool means a soft reboot, never a rejection.
                let hard = message.get_bool().unwrap_or(false);
                dev_sys.reboot(hard).await?;
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported dev_sys command: {other}"
                )));
            }
        }
        Ok(None)
    }
}

/// Routing-table rows for the dev-sys service. Reboot has no natural report
/// event, so the routing opts into the success confirmation.
pub fn routings(registry: Arc<dyn Registry>) -> Vec<Routing> {
    let handler = Arc::new(DevSysCommandHandler { registry });
    vec![Routing::new(handler)
        .for_service(SERVICE_NAME)
        .for_type(CMD_THING_REBOOT)
        .with_success_confirmation()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AdapterRegistry;
    use crate::router::{Router, EVT_SUCCESS_REPORT};
    use crate::service::testutil::CapturingPublisher;
    use crate::thing::ProductInfo;
    use hubframe_bus::Value;
    use hubframe_core::EventBus;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeReboot {
        calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl RebootController for FakeReboot {
        async fn reboot_device(&self, hard: bool) -> Result<()> {
            self.calls.lock().push(hard);
            Ok(())
        }
    }

    async fn setup(
        controller: Arc<FakeReboot>,
        publisher: Arc<CapturingPublisher>,
    ) -> Router {
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
        let spec = ServiceSpecification::new(SERVICE_NAME, registry.service_address(SERVICE_NAME, "3"));
        registry
            .add_service(
                "3",
                Arc::new(DevSysService::new(spec, controller, publisher.clone())),
            )
            .await
            .unwrap();

        let mut router = Router::new(publisher);
        router.add_all(routings(registry));
        router
    }

    fn reboot_message(value: Value) -> Message {
        let mut msg = Message::new(SERVICE_NAME, CMD_THING_REBOOT, value);
        msg.topic = Some("pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:dev_sys/ad:3".to_string());
        msg
    }

    #[tokio::test]
    async fn test_reboot_confirms_success() {
        let controller = Arc::new(FakeReboot::default());
        let publisher = CapturingPublisher::new();
        let router = setup(controller.clone(), publisher.clone()).await;

        router.route(reboot_message(Value::Bool(true))).await;
        assert_eq!(*controller.calls.lock(), vec![true]);
        let (topic, msg) = publisher.take().pop().unwrap();
        assert_eq!(topic, "pt:j1/mt:evt/rt:dev/rn:zw/ad:1/sv:dev_sys/ad:3");
        assert_eq!(msg.message_type, EVT_SUCCESS_REPORT);
    }

    #[tokio::test]
    async fn test_null_payload_means_soft_reboot() {
        let controller = Arc::new(FakeReboot::default());
        let publisher = CapturingPublisher::new();
        let router = setup(controller.clone(), publisher.clone()).await;

        router.route(reboot_message(Value::Null)).await;
        assert_eq!(*controller.calls.lock(), vec![false]);
        assert_eq!(publisher.last().unwrap().message_type, EVT_SUCCESS_REPORT);
    }
}
