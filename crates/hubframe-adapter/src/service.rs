//! The uniform service layer.
//!
//! Every capability service embeds a [`ServiceBase`]: the specification, the
//! publisher handle, the reporting cache and one mutex guarding the whole
//! send path. The (cache query, vendor read, publish, cache update) sequence
//! is atomic per service; across services nothing is coordinated.

use crate::cache::{ReportingCache, ReportingStrategy};
use crate::spec::{props, ServiceSpecification};
use hubframe_bus::{Message, MsgType, Publisher, Value};
use hubframe_core::Result;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Outcome of a report attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOutcome {
    /// An event was published.
    pub published: bool,
    /// The value differed from the cached one.
    pub changed: bool,
}

impl ReportOutcome {
    pub const SKIPPED: ReportOutcome = ReportOutcome {
        published: false,
        changed: false,
    };
}

/// Common state embedded by every capability service.
pub struct ServiceBase {
    spec: ServiceSpecification,
    publisher: Arc<dyn Publisher>,
    lock: Mutex<()>,
    cache: ReportingCache,
    strategy: ReportingStrategy,
}

impl ServiceBase {
    pub fn new(spec: ServiceSpecification, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            spec,
            publisher,
            lock: Mutex::new(()),
            cache: ReportingCache::new(),
            strategy: ReportingStrategy::ReportOnChangeOnly,
        }
    }

    /// Override the default report-on-change-only strategy.
    pub fn with_strategy(mut self, strategy: ReportingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn specification(&self) -> &ServiceSpecification {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Event topic the service publishes on.
    pub fn topic(&self) -> String {
        self.spec
            .address
            .clone()
            .with_msg_type(MsgType::Evt)
            .to_topic()
    }

    /// Events the service declares via the `sup_events` property.
    pub fn supported_events(&self) -> Vec<String> {
        self.spec.prop_str_array(props::SUP_EVENTS)
    }

    /// Acquire the service mutex. Every method touching vendor state or the
    /// reporting cache runs under this guard.
    pub async fn serialize(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Stamp topic and source, then hand the message to the publisher.
    pub async fn send_message(&self, mut message: Message) -> Result<()> {
        let topic = self.topic();
        message.topic = Some(topic.clone());
        message.source = Some(self.spec.address.resource_name.clone());
        self.publisher.publish(&topic, &message).await
    }

    /// The cache-filtered publish path shared by every `send_*_report`.
    ///
    /// `force=true` bypasses the strategy but still updates the cache on a
    /// successful publish. On any error the cache is left untouched. Must be
    /// called while holding the service mutex.
    pub async fn publish_report<F>(
        &self,
        event_type: &str,
        sub_key: &str,
        value: Value,
        force: bool,
        decorate: F,
    ) -> Result<ReportOutcome>
    where
        F: FnOnce(Message) -> Message,
    {
        let changed = self.cache.has_changed(event_type, sub_key, &value);
        if !force
            && !self
                .cache
                .report_required(self.strategy, event_type, sub_key, &value)
        {
            debug!(service = %self.spec.name, event = event_type, "report suppressed by cache");
            return Ok(ReportOutcome {
                published: false,
                changed,
            });
        }

        let message = decorate(Message::new(self.spec.name.clone(), event_type, value.clone()));
        self.send_message(message).await?;
        self.cache.reported(event_type, sub_key, value);
        Ok(ReportOutcome {
            published: true,
            changed,
        })
    }

    /// Read access to the cache for callers needing finer queries
    /// (the extended meter report votes per entry).
    pub fn cache(&self) -> &ReportingCache {
        &self.cache
    }

    /// The configured strategy.
    pub fn strategy(&self) -> ReportingStrategy {
        self.strategy
    }
}

/// Object-safe face of a capability service.
///
/// The registry stores services as `Arc<dyn Service>`; handlers downcast via
/// [`Service::as_any`] to reach capability methods.
pub trait Service: Send + Sync + 'static {
    /// Shared state of the service.
    fn base(&self) -> &ServiceBase;

    /// For capability downcasts.
    fn as_any(&self) -> &dyn Any;

    /// Service name (`sv:` segment).
    fn name(&self) -> &str {
        self.base().name()
    }

    /// The specification this service was built from.
    fn specification(&self) -> &ServiceSpecification {
        self.base().specification()
    }

    /// Address of the thing the service sits on.
    fn thing_address(&self) -> &str {
        self.base().specification().thing_address()
    }

    /// Bus-wide unique address of the service.
    fn full_address(&self) -> String {
        self.base().specification().full_address()
    }
}

/// Downcast a registry handle to a concrete capability service.
///
/// Fails with a not-found error when the service at the topic is of a
/// different type, per the handler contract.
pub fn as_capability<'a, T: Service>(service: &'a Arc<dyn Service>) -> Result<&'a T> {
    service.as_any().downcast_ref::<T>().ok_or_else(|| {
        hubframe_core::Error::NotFound(format!(
            "service {} is not of the expected type",
            service.name()
        ))
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use hubframe_bus::Address;

    fn base(publisher: Arc<dyn Publisher>) -> ServiceBase {
        let spec = ServiceSpecification::new(
            "battery",
            Address::service("zw", "1", "battery", "7"),
        );
        ServiceBase::new(spec, publisher)
    }

    #[tokio::test]
    async fn test_forced_report_always_publishes() {
        let publisher = CapturingPublisher::new();
        let base = base(publisher.clone());

        for _ in 0..2 {
            let outcome = base
                .publish_report("evt.lvl.report", "", Value::Int(80), true, |m| m)
                .await
                .unwrap();
            assert!(outcome.published);
        }
        assert_eq!(publisher.count(), 2);
    }

    #[tokio::test]
    async fn test_unforced_repeat_suppressed() {
        let publisher = CapturingPublisher::new();
        let base = base(publisher.clone());

        let first = base
            .publish_report("evt.lvl.report", "", Value::Int(80), false, |m| m)
            .await
            .unwrap();
        assert!(first.published && first.changed);

        let second = base
            .publish_report("evt.lvl.report", "", Value::Int(80), false, |m| m)
            .await
            .unwrap();
        assert!(!second.published && !second.changed);
        assert_eq!(publisher.count(), 1);
    }

    #[tokio::test]
    async fn test_publish_error_leaves_cache_unchanged() {
        let base = base(Arc::new(FailingPublisher));

        assert!(base
            .publish_report("evt.lvl.report", "", Value::Int(80), false, |m| m)
            .await
            .is_err());
        // The failed publish must not count as reported.
        assert!(base.cache().has_changed("evt.lvl.report", "", &Value::Int(80)));
    }

    #[tokio::test]
    async fn test_send_message_stamps_topic_and_source() {
        let publisher = CapturingPublisher::new();
        let base = base(publisher.clone());
        base.send_message(Message::int("battery", "evt.lvl.report", 1))
            .await
            .unwrap();
        let (topic, msg) = publisher.take().pop().unwrap();
        assert_eq!(topic, "pt:j1/mt:evt/rt:dev/rn:zw/ad:1/sv:battery/ad:7");
        assert_eq!(msg.source.as_deref(), Some("zw"));
    }
}
