//! Typed view of the hub's aggregated object graph.
//!
//! The hub returns raw JSON per component; these structs decode the fields
//! adapters actually consume and keep the rest in `param`-style maps so a
//! hub upgrade does not break decoding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const COMPONENT_DEVICE: &str = "device";
pub const COMPONENT_THING: &str = "thing";
pub const COMPONENT_ROOM: &str = "room";
pub const COMPONENT_AREA: &str = "area";
pub const COMPONENT_HOUSE: &str = "house";
pub const COMPONENT_HUB: &str = "hub";
pub const COMPONENT_SHORTCUT: &str = "shortcut";
pub const COMPONENT_MODE: &str = "mode";
pub const COMPONENT_TIMER: &str = "timer";
pub const COMPONENT_SERVICE: &str = "service";
pub const COMPONENT_STATE: &str = "state";

/// Every component the hub can serve, in request order.
pub const ALL_COMPONENTS: [&str; 11] = [
    COMPONENT_DEVICE,
    COMPONENT_THING,
    COMPONENT_ROOM,
    COMPONENT_AREA,
    COMPONENT_HOUSE,
    COMPONENT_HUB,
    COMPONENT_SHORTCUT,
    COMPONENT_MODE,
    COMPONENT_TIMER,
    COMPONENT_SERVICE,
    COMPONENT_STATE,
];

/// Naming a device gave it a client section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeClientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Bus coordinates of a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeFimp {
    #[serde(default)]
    pub adapter: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeDevice {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thing: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<i64>,
    #[serde(default)]
    pub client: PrimeClientInfo,
    #[serde(default)]
    pub fimp: PrimeFimp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functionality: Option<String>,
    /// Everything else the hub attaches to a device.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub param: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeThing {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub devices: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeRoom {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<i64>,
    #[serde(default)]
    pub client: PrimeClientInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeArea {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeHouse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeHub {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeShortcut {
    pub id: i64,
    #[serde(default)]
    pub client: PrimeClientInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeMode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeTimer {
    pub id: i64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimeState {
    #[serde(default)]
    pub devices: Vec<serde_json::Value>,
}

/// Result of the get-everything aggregator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimeComponentSet {
    pub devices: Vec<PrimeDevice>,
    pub things: Vec<PrimeThing>,
    pub rooms: Vec<PrimeRoom>,
    pub areas: Vec<PrimeArea>,
    pub shortcuts: Vec<PrimeShortcut>,
    pub modes: Vec<PrimeMode>,
    pub timers: Vec<PrimeTimer>,
    pub services: Vec<PrimeService>,
    pub house: Option<PrimeHouse>,
    pub hub: Option<PrimeHub>,
    pub state: Option<PrimeState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_decodes_with_unknown_fields() {
        let raw = serde_json::json!({
            "id": 12,
            "thing": 4,
            "room": 2,
            "client": {"name": "Ceiling lamp"},
            "fimp": {"adapter": "zigbee", "address": "7", "group": "ch_0"},
            "functionality": "lighting",
            "param": {"power": "ac"},
            "somethingNew": true
        });
        let device: PrimeDevice = serde_json::from_value(raw).unwrap();
        assert_eq!(device.id, 12);
        assert_eq!(device.fimp.adapter, "zigbee");
        assert_eq!(device.client.name.as_deref(), Some("Ceiling lamp"));
        assert_eq!(device.param.get("power"), Some(&serde_json::json!("ac")));
    }

    #[test]
    fn test_minimal_thing_decodes() {
        let thing: PrimeThing = serde_json::from_value(serde_json::json!({"id": 1})).unwrap();
        assert_eq!(thing.id, 1);
        assert!(thing.devices.is_empty());
    }
}
