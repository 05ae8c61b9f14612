//! Topic grammar.
//!
//! Full topic: `pt:j1/mt:<cmd|evt|rsp>/rt:<dev|ad|app|cloud>/rn:<name>/
//! ad:<addr>[/sv:<service>/ad:<thing>]`. Service specifications carry the
//! same address without the `pt`/`mt` prefix.

use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Payload type segment. Only JSON v1 is in use.
pub const PAYLOAD_TYPE_J1: &str = "j1";

/// Message direction segment (`mt:`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Cmd,
    Evt,
    Rsp,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Cmd => "cmd",
            MsgType::Evt => "evt",
            MsgType::Rsp => "rsp",
        }
    }
}

impl std::str::FromStr for MsgType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cmd" => Ok(MsgType::Cmd),
            "evt" => Ok(MsgType::Evt),
            "rsp" => Ok(MsgType::Rsp),
            other => Err(Error::Decode(format!("unknown message type: {other}"))),
        }
    }
}

/// Resource type segment (`rt:`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Dev,
    Ad,
    App,
    Cloud,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Dev => "dev",
            ResourceType::Ad => "ad",
            ResourceType::App => "app",
            ResourceType::Cloud => "cloud",
        }
    }
}

impl std::str::FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(ResourceType::Dev),
            "ad" => Ok(ResourceType::Ad),
            "app" => Ok(ResourceType::App),
            "cloud" => Ok(ResourceType::Cloud),
            other => Err(Error::Decode(format!("unknown resource type: {other}"))),
        }
    }
}

/// Decomposed bus address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Direction; `None` for the prefix-less service-spec form.
    pub msg_type: Option<MsgType>,
    pub resource_type: ResourceType,
    /// Adapter name (`rn:`).
    pub resource_name: String,
    /// Adapter address (first `ad:`).
    pub resource_address: String,
    /// Service name (`sv:`); absent for adapter-level topics.
    pub service_name: Option<String>,
    /// Thing address (second `ad:`).
    pub service_address: Option<String>,
}

impl Address {
    /// Address of a device service.
    pub fn service(
        adapter_name: impl Into<String>,
        adapter_address: impl Into<String>,
        service_name: impl Into<String>,
        thing_address: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: None,
            resource_type: ResourceType::Dev,
            resource_name: adapter_name.into(),
            resource_address: adapter_address.into(),
            service_name: Some(service_name.into()),
            service_address: Some(thing_address.into()),
        }
    }

    /// Address of the adapter itself.
    pub fn adapter(adapter_name: impl Into<String>, adapter_address: impl Into<String>) -> Self {
        Self {
            msg_type: None,
            resource_type: ResourceType::Ad,
            resource_name: adapter_name.into(),
            resource_address: adapter_address.into(),
            service_name: None,
            service_address: None,
        }
    }

    /// Same address with the direction set.
    pub fn with_msg_type(mut self, msg_type: MsgType) -> Self {
        self.msg_type = Some(msg_type);
        self
    }

    /// The event mirror of a command topic.
    pub fn to_event(&self) -> Self {
        self.clone().with_msg_type(MsgType::Evt)
    }

    /// Parse either the full topic form or the service-spec form.
    pub fn parse(topic: &str) -> Result<Self> {
        let mut msg_type = None;
        let mut resource_type = None;
        let mut resource_name = None;
        let mut resource_address = None;
        let mut service_name = None;
        let mut service_address = None;

        for segment in topic.split('/').filter(|s| !s.is_empty()) {
            let (prefix, value) = segment
                .split_once(':')
                .ok_or_else(|| Error::Decode(format!("malformed topic segment: {segment}")))?;
            match prefix {
                "pt" => {
                    if value != PAYLOAD_TYPE_J1 {
                        return Err(Error::Decode(format!("unsupported payload type: {value}")));
                    }
                }
                "mt" => msg_type = Some(value.parse()?),
                "rt" => resource_type = Some(value.parse()?),
                "rn" => resource_name = Some(value.to_string()),
                "sv" => service_name = Some(value.to_string()),
                "ad" => {
                    // First ad: is the adapter, second the thing.
                    if resource_address.is_none() {
                        resource_address = Some(value.to_string());
                    } else {
                        service_address = Some(value.to_string());
                    }
                }
                other => {
                    return Err(Error::Decode(format!("unknown topic segment: {other}")));
                }
            }
        }

        Ok(Self {
            msg_type,
            resource_type: resource_type
                .ok_or_else(|| Error::Decode(format!("topic missing rt: segment: {topic}")))?,
            resource_name: resource_name
                .ok_or_else(|| Error::Decode(format!("topic missing rn: segment: {topic}")))?,
            resource_address: resource_address
                .ok_or_else(|| Error::Decode(format!("topic missing ad: segment: {topic}")))?,
            service_name,
            service_address,
        })
    }

    /// Render the full topic, including `pt`/`mt` when a direction is set.
    pub fn to_topic(&self) -> String {
        let mut out = String::new();
        if let Some(mt) = self.msg_type {
            out.push_str("pt:");
            out.push_str(PAYLOAD_TYPE_J1);
            out.push_str("/mt:");
            out.push_str(mt.as_str());
            out.push('/');
        }
        out.push_str("rt:");
        out.push_str(self.resource_type.as_str());
        out.push_str("/rn:");
        out.push_str(&self.resource_name);
        out.push_str("/ad:");
        out.push_str(&self.resource_address);
        if let (Some(sv), Some(ad)) = (&self.service_name, &self.service_address) {
            out.push_str("/sv:");
            out.push_str(sv);
            out.push_str("/ad:");
            out.push_str(ad);
        }
        out
    }

    /// Service-spec form: no `pt`/`mt` prefix, leading slash.
    pub fn to_spec_address(&self) -> String {
        let mut plain = self.clone();
        plain.msg_type = None;
        format!("/{}", plain.to_topic())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_topic() {
        let addr =
            Address::parse("pt:j1/mt:cmd/rt:dev/rn:zigbee/ad:1/sv:battery/ad:7").unwrap();
        assert_eq!(addr.msg_type, Some(MsgType::Cmd));
        assert_eq!(addr.resource_type, ResourceType::Dev);
        assert_eq!(addr.resource_name, "zigbee");
        assert_eq!(addr.resource_address, "1");
        assert_eq!(addr.service_name.as_deref(), Some("battery"));
        assert_eq!(addr.service_address.as_deref(), Some("7"));
        assert_eq!(
            addr.to_topic(),
            "pt:j1/mt:cmd/rt:dev/rn:zigbee/ad:1/sv:battery/ad:7"
        );
    }

    #[test]
    fn test_parse_spec_address() {
        let addr = Address::parse("/rt:dev/rn:zigbee/ad:1/sv:meter_elec/ad:7").unwrap();
        assert_eq!(addr.msg_type, None);
        assert_eq!(addr.service_name.as_deref(), Some("meter_elec"));
        assert_eq!(
            addr.to_spec_address(),
            "/rt:dev/rn:zigbee/ad:1/sv:meter_elec/ad:7"
        );
    }

    #[test]
    fn test_event_mirror() {
        let cmd = Address::parse("pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:out_lvl_switch/ad:3").unwrap();
        let evt = cmd.to_event();
        assert_eq!(
            evt.to_topic(),
            "pt:j1/mt:evt/rt:dev/rn:zw/ad:1/sv:out_lvl_switch/ad:3"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Address::parse("pt:j1/mt:zzz/rt:dev/rn:a/ad:1").is_err());
        assert!(Address::parse("nonsense").is_err());
        assert!(Address::parse("pt:j2/mt:cmd/rt:dev/rn:a/ad:1").is_err());
    }
}
