//! Virtual meter end to end: inclusion wires the service up, commands
//! configure it, level events drive the integration and the synthesised
//! numeric meter answers with readings.

mod common;

use async_trait::async_trait;
use common::{inbound, init_tracing, RecordingPublisher};
use hubframe_adapter::meter::{self, MeterService};
use hubframe_adapter::outlvlswitch::{
    self, LevelSwitchController, LevelSwitchControllers, OutLvlSwitchService,
};
use hubframe_adapter::router::Router;
use hubframe_adapter::service::as_capability;
use hubframe_adapter::spec::{props, ServiceSpecification};
use hubframe_adapter::virtual_meter::{
    self, virtual_meter_handler, VirtualMeterManager, VirtualMeterStorage,
};
use hubframe_adapter::{AdapterRegistry, ProductInfo, Registry};
use hubframe_bus::Message;
use hubframe_core::{EventBus, Result};
use hubframe_storage::{KeyValueStore, MemoryBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct DimmerAtLevel {
    level: Mutex<i64>,
}

#[async_trait]
impl LevelSwitchController for DimmerAtLevel {
    async fn level_switch_level_report(&self) -> Result<i64> {
        Ok(*self.level.lock())
    }

    async fn set_level_switch_level(&self, level: i64, _duration: Option<Duration>) -> Result<()> {
        *self.level.lock() = level;
        Ok(())
    }

    async fn set_level_switch_binary_state(&self, on: bool) -> Result<()> {
        *self.level.lock() = if on { 99 } else { 0 };
        Ok(())
    }
}

struct Setup {
    publisher: Arc<RecordingPublisher>,
    registry: Arc<AdapterRegistry>,
    manager: Arc<VirtualMeterManager>,
    switch: Arc<OutLvlSwitchService>,
    router: Router,
}

/// One thing with a 0..99 dimmer, the virtual-meter listener attached to
/// the event bus, and the routing table for the virtual-meter commands.
async fn setup() -> Setup {
    init_tracing();
    let publisher = RecordingPublisher::new();
    let bus = EventBus::new();
    let registry = Arc::new(AdapterRegistry::new(
        "zw",
        "1",
        publisher.clone(),
        bus.clone(),
    ));
    registry
        .register_thing("7", vec!["ch_0".to_string()], ProductInfo::default())
        .await
        .unwrap();

    let spec = ServiceSpecification::new(
        outlvlswitch::SERVICE_NAME,
        registry.service_address(outlvlswitch::SERVICE_NAME, "7"),
    )
    .with_prop(props::MAX_LVL, serde_json::json!(99));
    let switch = Arc::new(OutLvlSwitchService::new(
        spec,
        LevelSwitchControllers {
            switch: Arc::new(DimmerAtLevel {
                level: Mutex::new(50),
            }),
            transition: None,
        },
        publisher.clone(),
        bus.clone(),
    ));
    registry.add_service("7", switch.clone()).await.unwrap();

    let storage = VirtualMeterStorage::new(KeyValueStore::new(Arc::new(MemoryBackend::new())));
    let manager = VirtualMeterManager::new(storage, publisher.clone());
    manager.set_adapter(registry.clone()).await;
    bus.attach_handler(virtual_meter_handler(manager.clone(), registry.clone()));
    tokio::task::yield_now().await;

    let mut router = Router::new(publisher.clone());
    router.add_all(virtual_meter::service::routings(registry.clone()));

    Setup {
        publisher,
        registry,
        manager,
        switch,
        router,
    }
}

fn power_map() -> HashMap<String, f64> {
    HashMap::from([("on".to_string(), 100.0), ("off".to_string(), 1.0)])
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_inclusion_report_attaches_virtual_meter_service() {
    let s = setup().await;
    s.registry.send_inclusion_report("7").await.unwrap();
    settle().await;

    let report = s.registry.thing("7").await.unwrap();
    let names: Vec<_> = report.services.iter().map(|sv| sv.name.as_str()).collect();
    assert!(names.contains(&virtual_meter::service::SERVICE_NAME));
    // Unconfigured: no synthesised numeric meter yet.
    assert!(!names.contains(&"meter_elec"));
}

#[tokio::test]
async fn test_configure_track_level_and_read_back() {
    let s = setup().await;
    s.registry.send_inclusion_report("7").await.unwrap();
    settle().await;

    // Configure over the bus.
    s.router
        .route(inbound(
            "zw",
            "7",
            virtual_meter::service::SERVICE_NAME,
            Message::float_map(
                virtual_meter::service::SERVICE_NAME,
                virtual_meter::service::CMD_METER_ADD,
                power_map(),
            )
            .with_prop(virtual_meter::service::PROP_UNIT, "W"),
        ))
        .await;
    settle().await;

    let reports = s
        .publisher
        .by_type(virtual_meter::service::EVT_METER_REPORT);
    assert!(!reports.is_empty());
    assert_eq!(reports.last().unwrap().1.get_float_map().unwrap(), &power_map());

    // The numeric meter appeared alongside the configuration surface.
    let report = s.registry.thing("7").await.unwrap();
    let elec = report
        .services
        .iter()
        .find(|sv| sv.name == "meter_elec")
        .expect("numeric meter attached");
    assert_eq!(elec.props.get(props::IS_VIRTUAL), Some(&serde_json::json!(true)));

    // A level report from the dimmer moves the integration to 50/99 duty.
    s.switch.send_level_report(true).await.unwrap();
    settle().await;
    let watts = s.manager.report("7", "W").await.unwrap();
    assert!((watts - 100.0 * 50.0 / 99.0).abs() < 1e-9);
    let energy = s.manager.report("7", "kWh").await.unwrap();
    assert!(energy >= 0.0 && energy < 0.01);
}

#[tokio::test]
async fn test_numeric_meter_publishes_virtual_readings() {
    let s = setup().await;
    s.registry.send_inclusion_report("7").await.unwrap();
    settle().await;
    s.manager
        .add_meter("7", power_map(), "W".to_string())
        .await
        .unwrap();
    s.switch.send_level_report(true).await.unwrap();
    settle().await;

    let services = s.registry.services_by_name("meter_elec").await;
    assert_eq!(services.len(), 1);
    let elec = as_capability::<MeterService>(&services[0]).unwrap();
    elec.send_meter_report(None, true).await.unwrap();

    let reports = s.publisher.by_type(meter::EVT_METER_REPORT);
    let watts = reports
        .iter()
        .find(|(_, m)| m.props.get_string("unit") == Some("W"))
        .expect("W reading published");
    assert!((watts.1.get_float().unwrap() - 100.0 * 50.0 / 99.0).abs() < 1e-9);
    assert_eq!(watts.1.props.get_string("is_virtual"), Some("true"));
    assert!(reports
        .iter()
        .any(|(_, m)| m.props.get_string("unit") == Some("kWh")));
}

#[tokio::test]
async fn test_remove_detaches_numeric_meter_and_clears_modes() {
    let s = setup().await;
    s.registry.send_inclusion_report("7").await.unwrap();
    settle().await;
    s.manager
        .add_meter("7", power_map(), "W".to_string())
        .await
        .unwrap();

    s.router
        .route(inbound(
            "zw",
            "7",
            virtual_meter::service::SERVICE_NAME,
            Message::null(
                virtual_meter::service::SERVICE_NAME,
                virtual_meter::service::CMD_METER_REMOVE,
            ),
        ))
        .await;
    settle().await;

    let reports = s
        .publisher
        .by_type(virtual_meter::service::EVT_METER_REPORT);
    assert!(reports.last().unwrap().1.get_float_map().unwrap().is_empty());
    assert!(s
        .registry
        .thing("7")
        .await
        .unwrap()
        .services
        .iter()
        .all(|sv| sv.name != "meter_elec"));

    // Level events for the unconfigured meter are a no-op, not an error.
    s.switch.send_level_report(true).await.unwrap();
    settle().await;
    assert!(s.manager.modes("7").await.unwrap().is_empty());
}
