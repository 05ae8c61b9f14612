//! MQTT transport for the bus.
//!
//! Thin wrapper over `rumqttc`: publishes serialized envelopes and forwards
//! inbound publishes to a [`MessageSink`]. Reconnects are rumqttc's problem;
//! the event loop task polls until the client is dropped.

use crate::message::Message;
use crate::publisher::{MessageSink, Publisher};
use async_trait::async_trait;
use hubframe_core::{Error, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// MQTT connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    /// Client id; a random one is generated when absent.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// MQTT-backed bus transport.
pub struct MqttTransport {
    client: AsyncClient,
    loop_handle: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect and start the event loop. Inbound publishes are parsed and
    /// handed to `sink`; unparseable payloads are logged and dropped.
    pub async fn connect(config: MqttConfig, sink: Arc<dyn MessageSink>) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("hubframe_{}", Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(config.keep_alive);
        if let (Some(u), Some(p)) = (&config.username, &config.password) {
            options.set_credentials(u, p);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let loop_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match Message::parse(&publish.topic, &publish.payload) {
                            Ok(message) => sink.deliver(message).await,
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "dropping unparseable message");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt event loop error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            loop_handle,
        })
    }

    /// Subscribe to a topic filter.
    pub async fn subscribe(&self, filter: &str) -> Result<()> {
        debug!(filter, "subscribing");
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }

    /// Drop the subscription for a topic filter.
    pub async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.loop_handle.abort();
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        let payload = message.serialize()?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }
}

#[async_trait]
impl crate::publisher::Subscriber for MqttTransport {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        MqttTransport::subscribe(self, topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        MqttTransport::unsubscribe(self, topic).await
    }
}
