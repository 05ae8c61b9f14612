//! The bus message envelope.

use crate::value::{Value, ValueType};
use chrono::{DateTime, SecondsFormat, Utc};
use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Envelope schema version.
pub const MESSAGE_VERSION: &str = "1";

/// Downstream aggregation hint for repeated publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// Aggregate by `storage_strategy_key`.
    Aggregate,
    /// Store each dimension separately.
    Split,
    /// Do not store at all.
    Skip,
}

/// String property map attached to every message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Props(pub HashMap<String, String>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Property as a string, if present.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Property parsed as an integer; `Ok(None)` when absent.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Error::Decode(format!("property {key} is not an integer: {raw}"))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single bus message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message type, e.g. `cmd.lvl.set` or `evt.meter.report`.
    pub message_type: String,
    /// Name of the source/target service (`serv`).
    pub service: String,
    /// Typed payload.
    pub value: Value,
    /// String properties.
    pub props: Props,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Source resource; filled in by the publishing service.
    pub source: Option<String>,
    /// Envelope version.
    pub version: String,
    /// Unique message id.
    pub uid: Uuid,
    /// Creation time.
    pub ctime: DateTime<Utc>,
    /// Uid of the request this responds to.
    pub resp_to: Option<String>,
    /// Storage hint for downstream consumers.
    pub storage_strategy: Option<StorageStrategy>,
    /// Aggregation key used with [`StorageStrategy::Aggregate`].
    pub storage_strategy_key: Option<String>,
    /// Topic this message arrived on / should go out on. Not serialized.
    pub topic: Option<String>,
}

impl Message {
    /// New message with an explicit value.
    pub fn new(
        service: impl Into<String>,
        message_type: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            service: service.into(),
            value,
            props: Props::new(),
            tags: Vec::new(),
            source: None,
            version: MESSAGE_VERSION.to_string(),
            uid: Uuid::new_v4(),
            ctime: Utc::now(),
            resp_to: None,
            storage_strategy: None,
            storage_strategy_key: None,
            topic: None,
        }
    }

    pub fn null(service: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::new(service, message_type, Value::Null)
    }

    pub fn bool(service: impl Into<String>, message_type: impl Into<String>, v: bool) -> Self {
        Self::new(service, message_type, Value::Bool(v))
    }

    pub fn int(service: impl Into<String>, message_type: impl Into<String>, v: i64) -> Self {
        Self::new(service, message_type, Value::Int(v))
    }

    pub fn float(service: impl Into<String>, message_type: impl Into<String>, v: f64) -> Self {
        Self::new(service, message_type, Value::Float(v))
    }

    pub fn string(
        service: impl Into<String>,
        message_type: impl Into<String>,
        v: impl Into<String>,
    ) -> Self {
        Self::new(service, message_type, Value::String(v.into()))
    }

    pub fn str_array(
        service: impl Into<String>,
        message_type: impl Into<String>,
        v: Vec<String>,
    ) -> Self {
        Self::new(service, message_type, Value::StrArray(v))
    }

    pub fn str_map(
        service: impl Into<String>,
        message_type: impl Into<String>,
        v: HashMap<String, String>,
    ) -> Self {
        Self::new(service, message_type, Value::StrMap(v))
    }

    pub fn float_map(
        service: impl Into<String>,
        message_type: impl Into<String>,
        v: HashMap<String, f64>,
    ) -> Self {
        Self::new(service, message_type, Value::FloatMap(v))
    }

    pub fn object<T: Serialize>(
        service: impl Into<String>,
        message_type: impl Into<String>,
        v: &T,
    ) -> Result<Self> {
        Ok(Self::new(
            service,
            message_type,
            Value::Object(serde_json::to_value(v)?),
        ))
    }

    /// Attach a property, builder style.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.set(key, value);
        self
    }

    /// Attach a storage strategy hint.
    pub fn with_storage_strategy(
        mut self,
        strategy: StorageStrategy,
        key: Option<String>,
    ) -> Self {
        self.storage_strategy = Some(strategy);
        self.storage_strategy_key = key;
        self
    }

    /// Mark this message as a response to another.
    pub fn in_response_to(mut self, uid: impl Into<String>) -> Self {
        self.resp_to = Some(uid.into());
        self
    }

    pub fn get_bool(&self) -> Result<bool> {
        self.value.as_bool()
    }

    pub fn get_int(&self) -> Result<i64> {
        self.value.as_int()
    }

    pub fn get_float(&self) -> Result<f64> {
        self.value.as_float()
    }

    pub fn get_string(&self) -> Result<&str> {
        self.value.as_str()
    }

    pub fn get_str_array(&self) -> Result<&[String]> {
        self.value.as_str_array()
    }

    pub fn get_float_map(&self) -> Result<&HashMap<String, f64>> {
        self.value.as_float_map()
    }

    /// Deserialize an object payload into a concrete type.
    pub fn get_object<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.as_object()?.clone())?)
    }

    /// Serialize to the wire JSON.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&WireMessage::from(self))?)
    }

    /// Parse wire JSON arriving on `topic`.
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self> {
        let wire: WireMessage = serde_json::from_slice(payload)?;
        let mut msg = Message::try_from(wire)?;
        msg.topic = Some(topic.to_string());
        Ok(msg)
    }
}

/// Serde mirror of the JSON envelope.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    message_type: String,
    serv: String,
    val_t: ValueType,
    val: serde_json::Value,
    #[serde(default)]
    props: HashMap<String, String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    src: Option<String>,
    ver: String,
    uid: String,
    ctime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resp_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_strategy: Option<StorageStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_strategy_key: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        WireMessage {
            message_type: msg.message_type.clone(),
            serv: msg.service.clone(),
            val_t: msg.value.value_type(),
            val: msg.value.to_json(),
            props: msg.props.0.clone(),
            tags: msg.tags.clone(),
            src: msg.source.clone(),
            ver: msg.version.clone(),
            uid: msg.uid.to_string(),
            ctime: msg.ctime.to_rfc3339_opts(SecondsFormat::Secs, true),
            resp_to: msg.resp_to.clone(),
            storage_strategy: msg.storage_strategy,
            storage_strategy_key: msg.storage_strategy_key.clone(),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        Ok(Message {
            value: Value::from_json(wire.val_t, wire.val)?,
            message_type: wire.message_type,
            service: wire.serv,
            props: Props(wire.props),
            tags: wire.tags,
            source: wire.src,
            version: wire.ver,
            uid: Uuid::parse_str(&wire.uid)
                .map_err(|e| Error::Decode(format!("bad message uid: {e}")))?,
            ctime: DateTime::parse_from_rfc3339(&wire.ctime)
                .map_err(|e| Error::Decode(format!("bad message ctime: {e}")))?
                .with_timezone(&Utc),
            resp_to: wire.resp_to,
            storage_strategy: wire.storage_strategy,
            storage_strategy_key: wire.storage_strategy_key,
            topic: None,
        })
    }
}
