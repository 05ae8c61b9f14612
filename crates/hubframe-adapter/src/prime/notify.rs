//! Incremental change notifications from the hub.
//!
//! The notify envelope is generic; its payload only makes sense once the
//! `component` field picks the concrete type.

use crate::prime::model::*;
use hubframe_bus::Message;
use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const EVT_PRIME_NOTIFY: &str = "evt.pd7.notify";

/// One decoded change.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimeComponent {
    Device(PrimeDevice),
    Thing(PrimeThing),
    Room(PrimeRoom),
    Area(PrimeArea),
    House(PrimeHouse),
    Hub(PrimeHub),
    Shortcut(PrimeShortcut),
    Mode(PrimeMode),
    Timer(PrimeTimer),
    Service(PrimeService),
    State(PrimeState),
}

/// Change-notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeNotify {
    /// `add`, `edit` or `delete`.
    pub cmd: String,
    pub component: String,
    #[serde(default)]
    pub param: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl PrimeNotify {
    pub fn parse(message: &Message) -> Result<Self> {
        if message.message_type != EVT_PRIME_NOTIFY {
            return Err(Error::Validation(format!(
                "not a prime notify: {}",
                message.message_type
            )));
        }
        message.get_object()
    }

    /// Decode the payload into the component named by the envelope.
    pub fn content(&self) -> Result<PrimeComponent> {
        fn decode<T: for<'de> Deserialize<'de>>(param: &serde_json::Value) -> Result<T> {
            Ok(serde_json::from_value(param.clone())?)
        }
        match self.component.as_str() {
            COMPONENT_DEVICE => Ok(PrimeComponent::Device(decode(&self.param)?)),
            COMPONENT_THING => Ok(PrimeComponent::Thing(decode(&self.param)?)),
            COMPONENT_ROOM => Ok(PrimeComponent::Room(decode(&self.param)?)),
            COMPONENT_AREA => Ok(PrimeComponent::Area(decode(&self.param)?)),
            COMPONENT_HOUSE => Ok(PrimeComponent::House(decode(&self.param)?)),
            COMPONENT_HUB => Ok(PrimeComponent::Hub(decode(&self.param)?)),
            COMPONENT_SHORTCUT => Ok(PrimeComponent::Shortcut(decode(&self.param)?)),
            COMPONENT_MODE => Ok(PrimeComponent::Mode(decode(&self.param)?)),
            COMPONENT_TIMER => Ok(PrimeComponent::Timer(decode(&self.param)?)),
            COMPONENT_SERVICE => Ok(PrimeComponent::Service(decode(&self.param)?)),
            COMPONENT_STATE => Ok(PrimeComponent::State(decode(&self.param)?)),
            other => Err(Error::Validation(format!(
                "unknown prime component: {other}"
            ))),
        }
    }
}
