//! Message routing.
//!
//! A [`Routing`] pairs matcher predicates with a handler. The [`Router`]
//! walks its table for each inbound message, runs the first matching
//! handler, and owns the error-to-bus mapping: any handler error becomes an
//! `evt.error.report` on the same topic; handlers without a natural domain
//! event can opt into an `evt.success.report` confirmation.

use async_trait::async_trait;
use hubframe_bus::{Address, Message, MessageSink, Publisher};
use hubframe_core::Result;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Event type for the error report contract.
pub const EVT_ERROR_REPORT: &str = "evt.error.report";
/// Event type for the success confirmation contract.
pub const EVT_SUCCESS_REPORT: &str = "evt.success.report";

/// Handles one inbound message, optionally returning a reply envelope.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message, address: &Address) -> Result<Option<Message>>;
}

/// Predicate over an inbound message.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact service-name match on the `sv:` segment.
    Service(String),
    /// Prefix match on the `sv:` segment (e.g. `meter_` for all meters).
    ServicePrefix(String),
    /// Match on the message type.
    Type(String),
}

impl Matcher {
    fn matches(&self, message: &Message, address: &Address) -> bool {
        match self {
            Matcher::Service(name) => address.service_name.as_deref() == Some(name),
            Matcher::ServicePrefix(prefix) => address
                .service_name
                .as_deref()
                .map(|s| s.starts_with(prefix))
                .unwrap_or(false),
            Matcher::Type(t) => message.message_type == *t,
        }
    }
}

/// One row of the routing table.
pub struct Routing {
    matchers: Vec<Matcher>,
    handler: Arc<dyn MessageHandler>,
    confirm_success: bool,
}

impl Routing {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            matchers: Vec::new(),
            handler,
            confirm_success: false,
        }
    }

    /// Match an exact service name.
    pub fn for_service(mut self, name: impl Into<String>) -> Self {
        self.matchers.push(Matcher::Service(name.into()));
        self
    }

    /// Match a service-name prefix.
    pub fn for_service_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.matchers.push(Matcher::ServicePrefix(prefix.into()));
        self
    }

    /// Match a command type.
    pub fn for_type(mut self, message_type: impl Into<String>) -> Self {
        self.matchers.push(Matcher::Type(message_type.into()));
        self
    }

    /// Publish `evt.success.report` when the handler returns no reply.
    pub fn with_success_confirmation(mut self) -> Self {
        self.confirm_success = true;
        self
    }

    fn matches(&self, message: &Message, address: &Address) -> bool {
        self.matchers.iter().all(|m| m.matches(message, address))
    }
}

/// The routing table plus the error/success report layer.
pub struct Router {
    routings: Vec<Routing>,
    publisher: Arc<dyn Publisher>,
}

impl Router {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            routings: Vec::new(),
            publisher,
        }
    }

    pub fn add(&mut self, routing: Routing) {
        self.routings.push(routing);
    }

    pub fn add_all(&mut self, routings: Vec<Routing>) {
        self.routings.extend(routings);
    }

    /// Dispatch one inbound message.
    ///
    /// Never returns an error: failures end up on the bus per the error
    /// report contract, or in the log when even that fails.
    pub async fn route(&self, message: Message) {
        let Some(topic) = message.topic.clone() else {
            warn!("dropping message without topic");
            return;
        };
        let address = match Address::parse(&topic) {
            Ok(a) => a,
            Err(e) => {
                warn!(topic = %topic, error = %e, "dropping message with unroutable topic");
                return;
            }
        };

        let Some(routing) = self
            .routings
            .iter()
            .find(|r| r.matches(&message, &address))
        else {
            debug!(topic = %topic, message_type = %message.message_type, "no routing matched");
            return;
        };

        let reply_address = address.to_event();
        match routing.handler.handle(&message, &address).await {
            Ok(Some(mut reply)) => {
                reply.source.get_or_insert_with(|| address.resource_name.clone());
                if let Err(e) = self.publisher.publish_to(&reply_address, &reply).await {
                    error!(topic = %topic, error = %e, "failed to publish reply");
                }
            }
            Ok(None) => {
                if routing.confirm_success {
                    let confirmation =
                        Message::null(message.service.clone(), EVT_SUCCESS_REPORT);
                    if let Err(e) = self.publisher.publish_to(&reply_address, &confirmation).await
                    {
                        error!(topic = %topic, error = %e, "failed to publish success report");
                    }
                }
            }
            Err(e) => {
                warn!(topic = %topic, message_type = %message.message_type, error = %e, "handler failed");
                let report = Message::string(
                    message.service.clone(),
                    EVT_ERROR_REPORT,
                    format!("adapter: {e}"),
                );
                if let Err(publish_err) = self.publisher.publish_to(&reply_address, &report).await {
                    error!(topic = %topic, error = %publish_err, "failed to publish error report");
                }
            }
        }
    }
}

#[async_trait]
impl MessageSink for Router {
    async fn deliver(&self, message: Message) {
        self.route(message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testutil::CapturingPublisher;
    use hubframe_core::Error;

    struct OkHandler;

    #[async_trait]
    impl MessageHandler for OkHandler {
        async fn handle(&self, message: &Message, _address: &Address) -> Result<Option<Message>> {
            Ok(Some(Message::int(
                message.service.clone(),
                "evt.lvl.report",
                42,
            )))
        }
    }

    struct QuietHandler;

    #[async_trait]
    impl MessageHandler for QuietHandler {
        async fn handle(&self, _message: &Message, _address: &Address) -> Result<Option<Message>> {
            Ok(None)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _message: &Message, _address: &Address) -> Result<Option<Message>> {
            Err(Error::Validation("mode not supported".to_string()))
        }
    }

    fn inbound(service: &str, message_type: &str) -> Message {
        let mut msg = Message::null(service, message_type);
        msg.topic = Some(format!(
            "pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:{service}/ad:3"
        ));
        msg
    }

    #[tokio::test]
    async fn test_reply_goes_to_event_topic() {
        let publisher = CapturingPublisher::new();
        let mut router = Router::new(publisher.clone());
        router.add(
            Routing::new(Arc::new(OkHandler))
                .for_service("battery")
                .for_type("cmd.lvl.get_report"),
        );

        router.route(inbound("battery", "cmd.lvl.get_report")).await;
        let (topic, msg) = publisher.take().pop().unwrap();
        assert_eq!(topic, "pt:j1/mt:evt/rt:dev/rn:zw/ad:1/sv:battery/ad:3");
        assert_eq!(msg.message_type, "evt.lvl.report");
    }

    #[tokio::test]
    async fn test_error_report_contract() {
        let publisher = CapturingPublisher::new();
        let mut router = Router::new(publisher.clone());
        router.add(Routing::new(Arc::new(FailingHandler)).for_service("chargepoint"));

        router.route(inbound("chargepoint", "cmd.charge.start")).await;
        let (_, msg) = publisher.take().pop().unwrap();
        assert_eq!(msg.message_type, EVT_ERROR_REPORT);
        let text = msg.get_string().unwrap();
        assert!(text.starts_with("adapter: "));
        assert!(text.contains("mode not supported"));
    }

    #[tokio::test]
    async fn test_success_confirmation_only_when_requested() {
        let publisher = CapturingPublisher::new();
        let mut router = Router::new(publisher.clone());
        router.add(
            Routing::new(Arc::new(QuietHandler))
                .for_service("dev_sys")
                .with_success_confirmation(),
        );
        router.add(Routing::new(Arc::new(QuietHandler)).for_service("battery"));

        router.route(inbound("dev_sys", "cmd.thing.reboot")).await;
        router.route(inbound("battery", "cmd.lvl.get_report")).await;

        let published = publisher.take();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.message_type, EVT_SUCCESS_REPORT);
        assert!(published[0].1.value.is_null());
    }

    #[tokio::test]
    async fn test_prefix_and_type_matching() {
        let publisher = CapturingPublisher::new();
        let mut router = Router::new(publisher.clone());
        router.add(
            Routing::new(Arc::new(OkHandler))
                .for_service_prefix("meter_")
                .for_type("cmd.meter.get_report"),
        );

        // Wrong service: not dispatched.
        router.route(inbound("battery", "cmd.meter.get_report")).await;
        assert_eq!(publisher.count(), 0);

        // Wrong type: not dispatched.
        router.route(inbound("meter_elec", "cmd.meter.reset")).await;
        assert_eq!(publisher.count(), 0);

        router.route(inbound("meter_elec", "cmd.meter.get_report")).await;
        assert_eq!(publisher.count(), 1);
    }
}
