//! Thing/service registry.
//!
//! The framework proper only depends on the [`Registry`] trait; the bundled
//! [`AdapterRegistry`] is an in-memory implementation that also emits
//! inclusion reports on the bus and inclusion events on the event bus.

use crate::service::Service;
use crate::thing::{InclusionReport, ProductInfo};
use async_trait::async_trait;
use hubframe_bus::{Address, Message, MsgType, Publisher};
use hubframe_core::{AdapterEvent, Error, EventBus, InclusionEvent, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lookup and lifecycle interface the framework consumes.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolve a service by its spec-form full address.
    async fn service_by_address(&self, full_address: &str) -> Option<Arc<dyn Service>>;

    /// Resolve the target service of an inbound topic.
    async fn service_by_topic(&self, topic: &str) -> Option<Arc<dyn Service>>;

    /// All services with the given name, across things.
    async fn services_by_name(&self, name: &str) -> Vec<Arc<dyn Service>>;

    /// Inclusion report for one thing, with its current service set.
    async fn thing(&self, address: &str) -> Option<InclusionReport>;

    /// Addresses of all registered things.
    async fn thing_addresses(&self) -> Vec<String>;

    /// Attach a service to a thing at runtime.
    async fn add_service(&self, thing_address: &str, service: Arc<dyn Service>) -> Result<()>;

    /// Detach a service from a thing. Returns whether it was present.
    async fn remove_service(&self, thing_address: &str, service_name: &str) -> Result<bool>;

    /// Re-emit the inclusion report for a thing.
    async fn send_inclusion_report(&self, thing_address: &str) -> Result<()>;

    /// Whether the initial thing sync has completed.
    async fn is_initialized(&self) -> bool;

    /// Whether periodic reporting should bypass this thing.
    async fn is_skipped(&self, thing_address: &str) -> bool;
}

struct ThingEntry {
    groups: Vec<String>,
    product: ProductInfo,
    /// Ordered; order is part of the inclusion report.
    services: Vec<Arc<dyn Service>>,
    skip_reporting: bool,
}

/// In-memory registry for one adapter instance.
pub struct AdapterRegistry {
    adapter_name: String,
    adapter_address: String,
    publisher: Arc<dyn Publisher>,
    event_bus: EventBus,
    things: RwLock<HashMap<String, ThingEntry>>,
    initialized: AtomicBool,
}

impl AdapterRegistry {
    pub fn new(
        adapter_name: impl Into<String>,
        adapter_address: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            adapter_address: adapter_address.into(),
            publisher,
            event_bus,
            things: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn adapter_address(&self) -> &str {
        &self.adapter_address
    }

    /// Bus address for a service on one of this adapter's things.
    pub fn service_address(&self, service_name: &str, thing_address: &str) -> Address {
        Address::service(
            self.adapter_name.clone(),
            self.adapter_address.clone(),
            service_name,
            thing_address,
        )
    }

    /// Create a thing at inclusion time.
    pub async fn register_thing(
        &self,
        address: impl Into<String>,
        groups: Vec<String>,
        product: ProductInfo,
    ) -> Result<()> {
        let address = address.into();
        let mut things = self.things.write().await;
        if things.contains_key(&address) {
            return Err(Error::Validation(format!(
                "thing {address} is already registered"
            )));
        }
        info!(thing = %address, "registering thing");
        things.insert(
            address,
            ThingEntry {
                groups,
                product,
                services: Vec::new(),
                skip_reporting: false,
            },
        );
        Ok(())
    }

    /// Remove a thing at exclusion time.
    pub async fn remove_thing(&self, address: &str) -> bool {
        self.things.write().await.remove(address).is_some()
    }

    /// Flip the initialized gate consulted by reporting-task voters.
    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    /// Flag a thing so periodic reporting bypasses it.
    pub async fn set_skip_reporting(&self, address: &str, skip: bool) {
        if let Some(entry) = self.things.write().await.get_mut(address) {
            entry.skip_reporting = skip;
        }
    }

    fn build_report(&self, address: &str, entry: &ThingEntry) -> InclusionReport {
        InclusionReport {
            address: address.to_string(),
            groups: entry.groups.clone(),
            product: entry.product.clone(),
            services: entry
                .services
                .iter()
                .map(|s| s.specification().clone())
                .collect(),
        }
    }
}

#[async_trait]
impl Registry for AdapterRegistry {
    async fn service_by_address(&self, full_address: &str) -> Option<Arc<dyn Service>> {
        let things = self.things.read().await;
        for entry in things.values() {
            if let Some(service) = entry
                .services
                .iter()
                .find(|s| s.full_address() == full_address)
            {
                return Some(service.clone());
            }
        }
        None
    }

    async fn service_by_topic(&self, topic: &str) -> Option<Arc<dyn Service>> {
        let address = Address::parse(topic).ok()?;
        let service_name = address.service_name?;
        let thing_address = address.service_address?;
        let things = self.things.read().await;
        let entry = things.get(&thing_address)?;
        entry
            .services
            .iter()
            .find(|s| s.name() == service_name)
            .cloned()
    }

    async fn services_by_name(&self, name: &str) -> Vec<Arc<dyn Service>> {
        let things = self.things.read().await;
        let mut out = Vec::new();
        for entry in things.values() {
            for service in &entry.services {
                if service.name() == name {
                    out.push(service.clone());
                }
            }
        }
        out
    }

    async fn thing(&self, address: &str) -> Option<InclusionReport> {
        let things = self.things.read().await;
        things
            .get(address)
            .map(|entry| self.build_report(address, entry))
    }

    async fn thing_addresses(&self) -> Vec<String> {
        self.things.read().await.keys().cloned().collect()
    }

    async fn add_service(&self, thing_address: &str, service: Arc<dyn Service>) -> Result<()> {
        let mut things = self.things.write().await;
        let entry = things
            .get_mut(thing_address)
            .ok_or_else(|| Error::NotFound(format!("thing {thing_address} not registered")))?;
        if entry.services.iter().any(|s| s.name() == service.name()) {
            debug!(thing = %thing_address, service = %service.name(), "service already attached");
            return Ok(());
        }
        info!(thing = %thing_address, service = %service.name(), "attaching service");
        entry.services.push(service);
        Ok(())
    }

    async fn remove_service(&self, thing_address: &str, service_name: &str) -> Result<bool> {
        let mut things = self.things.write().await;
        let entry = things
            .get_mut(thing_address)
            .ok_or_else(|| Error::NotFound(format!("thing {thing_address} not registered")))?;
        let before = entry.services.len();
        entry.services.retain(|s| s.name() != service_name);
        Ok(entry.services.len() != before)
    }

    async fn send_inclusion_report(&self, thing_address: &str) -> Result<()> {
        let report = {
            let things = self.things.read().await;
            let entry = things
                .get(thing_address)
                .ok_or_else(|| Error::NotFound(format!("thing {thing_address} not registered")))?;
            self.build_report(thing_address, entry)
        };

        let address = Address::adapter(self.adapter_name.clone(), self.adapter_address.clone())
            .with_msg_type(MsgType::Evt);
        let mut message = Message::object("thing", "evt.thing.inclusion_report", &report)?;
        message.source = Some(self.adapter_name.clone());
        self.publisher.publish_to(&address, &message).await?;

        self.event_bus.publish(
            AdapterEvent::InclusionReportSent(InclusionEvent {
                address: thing_address.to_string(),
            }),
            "registry",
        );
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn is_skipped(&self, thing_address: &str) -> bool {
        self.things
            .read()
            .await
            .get(thing_address)
            .map(|e| e.skip_reporting)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testutil::CapturingPublisher;
    use crate::service::ServiceBase;
    use crate::spec::ServiceSpecification;

    struct DummyService {
        base: ServiceBase,
    }

    impl Service for DummyService {
        fn base(&self) -> &ServiceBase {
            &self.base
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn dummy(registry: &AdapterRegistry, name: &str, thing: &str) -> Arc<dyn Service> {
        let spec = ServiceSpecification::new(name, registry.service_address(name, thing));
        Arc::new(DummyService {
            base: ServiceBase::new(spec, CapturingPublisher::new()),
        })
    }

    #[tokio::test]
    async fn test_lookup_by_topic_and_name() {
        let publisher = CapturingPublisher::new();
        let registry =
            AdapterRegistry::new("zw", "1", publisher, EventBus::new());
        registry
            .register_thing("7", vec!["ch_0".to_string()], ProductInfo::default())
            .await
            .unwrap();
        registry
            .add_service("7", dummy(&registry, "battery", "7"))
            .await
            .unwrap();

        let by_topic = registry
            .service_by_topic("pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:battery/ad:7")
            .await;
        assert!(by_topic.is_some());
        assert_eq!(by_topic.unwrap().name(), "battery");

        assert_eq!(registry.services_by_name("battery").await.len(), 1);
        assert!(registry
            .service_by_topic("pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:battery/ad:9")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_inclusion_report_lists_services_and_fires_event() {
        let publisher = CapturingPublisher::new();
        let bus = EventBus::new();
        let registry = AdapterRegistry::new("zw", "1", publisher.clone(), bus.clone());
        let mut rx = bus.subscribe();

        registry
            .register_thing("7", vec!["ch_0".to_string()], ProductInfo::default())
            .await
            .unwrap();
        registry
            .add_service("7", dummy(&registry, "battery", "7"))
            .await
            .unwrap();
        registry.send_inclusion_report("7").await.unwrap();

        let (topic, message) = publisher.take().pop().unwrap();
        assert_eq!(topic, "pt:j1/mt:evt/rt:ad/rn:zw/ad:1");
        let report: InclusionReport = message.get_object().unwrap();
        assert_eq!(report.address, "7");
        assert_eq!(report.services.len(), 1);

        let (event, _) = rx.recv().await.unwrap();
        assert!(matches!(event, AdapterEvent::InclusionReportSent(_)));
    }

    #[tokio::test]
    async fn test_remove_service_is_idempotent() {
        let registry = AdapterRegistry::new(
            "zw",
            "1",
            CapturingPublisher::new(),
            EventBus::new(),
        );
        registry
            .register_thing("7", vec![], ProductInfo::default())
            .await
            .unwrap();
        registry
            .add_service("7", dummy(&registry, "battery", "7"))
            .await
            .unwrap();
        assert!(registry.remove_service("7", "battery").await.unwrap());
        assert!(!registry.remove_service("7", "battery").await.unwrap());
    }
}
