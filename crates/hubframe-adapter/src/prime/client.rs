//! Synchronous request/response client for the hub's aggregated model.
//!
//! Requests are matched to responses by envelope uid. The client owns its
//! response-topic subscription and establishes it before the first send;
//! every request carries an explicit timeout.

use crate::prime::model::*;
use async_trait::async_trait;
use dashmap::DashMap;
use hubframe_bus::{Address, Message, MessageSink, MsgType, Publisher, ResourceType, Subscriber};
use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

pub const PRIME_SERVICE: &str = "prime";
pub const CMD_PRIME_REQUEST: &str = "cmd.pd7.request";
pub const EVT_PRIME_RESPONSE: &str = "evt.pd7.response";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request envelope understood by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub param: PrimeRequestParam,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeRequestParam {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl PrimeRequest {
    /// A `cmd=get` request for the named components.
    pub fn get(components: &[&str]) -> Self {
        Self {
            cmd: "get".to_string(),
            component: None,
            param: PrimeRequestParam {
                components: components.iter().map(|c| c.to_string()).collect(),
                id: None,
            },
            id: None,
        }
    }

    /// A `cmd=set` request against one component (shortcut run, mode
    /// change).
    pub fn set(component: &str, id: serde_json::Value) -> Self {
        Self {
            cmd: "set".to_string(),
            component: Some(component.to_string()),
            param: PrimeRequestParam::default(),
            id: Some(id),
        }
    }
}

/// Response envelope: raw per-component payloads keyed by component name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    #[serde(default)]
    pub param: HashMap<String, serde_json::Value>,
}

impl PrimeResponse {
    /// Decode one component's raw payload.
    pub fn component<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<T> {
        let raw = self
            .param
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("component {name} missing in response")))?;
        Ok(serde_json::from_value(raw.clone())?)
    }

    pub fn devices(&self) -> Result<Vec<PrimeDevice>> {
        self.component(COMPONENT_DEVICE)
    }

    pub fn things(&self) -> Result<Vec<PrimeThing>> {
        self.component(COMPONENT_THING)
    }

    pub fn rooms(&self) -> Result<Vec<PrimeRoom>> {
        self.component(COMPONENT_ROOM)
    }

    pub fn areas(&self) -> Result<Vec<PrimeArea>> {
        self.component(COMPONENT_AREA)
    }

    pub fn house(&self) -> Result<PrimeHouse> {
        self.component(COMPONENT_HOUSE)
    }

    pub fn hub(&self) -> Result<PrimeHub> {
        self.component(COMPONENT_HUB)
    }

    pub fn shortcuts(&self) -> Result<Vec<PrimeShortcut>> {
        self.component(COMPONENT_SHORTCUT)
    }

    pub fn modes(&self) -> Result<Vec<PrimeMode>> {
        self.component(COMPONENT_MODE)
    }

    pub fn timers(&self) -> Result<Vec<PrimeTimer>> {
        self.component(COMPONENT_TIMER)
    }

    pub fn services(&self) -> Result<Vec<PrimeService>> {
        self.component(COMPONENT_SERVICE)
    }

    pub fn state(&self) -> Result<PrimeState> {
        self.component(COMPONENT_STATE)
    }
}

/// Where requests go and where responses come back.
#[derive(Debug, Clone)]
pub struct PrimeClientConfig {
    pub request_address: Address,
    pub response_address: Address,
    pub timeout: Duration,
}

impl PrimeClientConfig {
    /// Conventional addressing: requests to the hub's `vinculum` app,
    /// responses on the adapter's own app topic.
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self {
            request_address: Address {
                msg_type: Some(MsgType::Cmd),
                resource_type: ResourceType::App,
                resource_name: "vinculum".to_string(),
                resource_address: "1".to_string(),
                service_name: None,
                service_address: None,
            },
            response_address: Address {
                msg_type: Some(MsgType::Rsp),
                resource_type: ResourceType::App,
                resource_name: adapter_name.into(),
                resource_address: "1".to_string(),
                service_name: None,
                service_address: None,
            },
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct PrimeClient {
    publisher: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
    config: PrimeClientConfig,
    pending: DashMap<String, oneshot::Sender<Message>>,
    subscribed: AtomicBool,
}

impl PrimeClient {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
        config: PrimeClientConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            publisher,
            subscriber,
            config,
            pending: DashMap::new(),
            subscribed: AtomicBool::new(false),
        })
    }

    async fn ensure_subscribed(&self) -> Result<()> {
        if self.subscribed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.subscriber
            .subscribe(&self.config.response_address.to_topic())
            .await?;
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, request: &PrimeRequest) -> Result<PrimeResponse> {
        self.ensure_subscribed().await?;

        let message = Message::object(PRIME_SERVICE, CMD_PRIME_REQUEST, request)?;
        let uid = message.uid.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(uid.clone(), tx);

        if let Err(e) = self
            .publisher
            .publish_to(&self.config.request_address, &message)
            .await
        {
            self.pending.remove(&uid);
            return Err(e);
        }

        match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(response)) => response.get_object(),
            Ok(Err(_)) => Err(Error::Timeout(format!("prime request {uid} abandoned"))),
            Err(_) => {
                self.pending.remove(&uid);
                Err(Error::Timeout(format!(
                    "no prime response within {:?}",
                    self.config.timeout
                )))
            }
        }
    }

    pub async fn get_components(&self, components: &[&str]) -> Result<PrimeResponse> {
        self.request(&PrimeRequest::get(components)).await
    }

    pub async fn get_devices(&self) -> Result<Vec<PrimeDevice>> {
        self.get_components(&[COMPONENT_DEVICE]).await?.devices()
    }

    pub async fn get_things(&self) -> Result<Vec<PrimeThing>> {
        self.get_components(&[COMPONENT_THING]).await?.things()
    }

    pub async fn get_rooms(&self) -> Result<Vec<PrimeRoom>> {
        self.get_components(&[COMPONENT_ROOM]).await?.rooms()
    }

    pub async fn get_areas(&self) -> Result<Vec<PrimeArea>> {
        self.get_components(&[COMPONENT_AREA]).await?.areas()
    }

    pub async fn get_house(&self) -> Result<PrimeHouse> {
        self.get_components(&[COMPONENT_HOUSE]).await?.house()
    }

    pub async fn get_shortcuts(&self) -> Result<Vec<PrimeShortcut>> {
        self.get_components(&[COMPONENT_SHORTCUT]).await?.shortcuts()
    }

    pub async fn get_modes(&self) -> Result<Vec<PrimeMode>> {
        self.get_components(&[COMPONENT_MODE]).await?.modes()
    }

    pub async fn get_timers(&self) -> Result<Vec<PrimeTimer>> {
        self.get_components(&[COMPONENT_TIMER]).await?.timers()
    }

    /// One round trip for the whole object graph. Components the hub does
    /// not serve come back empty rather than failing the call.
    pub async fn get_everything(&self) -> Result<PrimeComponentSet> {
        let response = self.get_components(&ALL_COMPONENTS).await?;
        Ok(PrimeComponentSet {
            devices: response.devices().unwrap_or_default(),
            things: response.things().unwrap_or_default(),
            rooms: response.rooms().unwrap_or_default(),
            areas: response.areas().unwrap_or_default(),
            shortcuts: response.shortcuts().unwrap_or_default(),
            modes: response.modes().unwrap_or_default(),
            timers: response.timers().unwrap_or_default(),
            services: response.services().unwrap_or_default(),
            house: response.house().ok(),
            hub: response.hub().ok(),
            state: response.state().ok(),
        })
    }

    pub async fn run_shortcut(&self, id: i64) -> Result<()> {
        self.request(&PrimeRequest::set(COMPONENT_SHORTCUT, serde_json::json!(id)))
            .await?;
        Ok(())
    }

    pub async fn set_mode(&self, mode: &str) -> Result<()> {
        self.request(&PrimeRequest::set(COMPONENT_MODE, serde_json::json!(mode)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for PrimeClient {
    async fn deliver(&self, message: Message) {
        if message.message_type != EVT_PRIME_RESPONSE {
            return;
        }
        let Some(resp_to) = message.resp_to.clone() else {
            debug!("prime response without resp_to");
            return;
        };
        if let Some((_, tx)) = self.pending.remove(&resp_to) {
            let _ = tx.send(message);
        } else {
            debug!(resp_to = %resp_to, "unmatched prime response");
        }
    }
}
