//! Service specifications.
//!
//! A specification is the declarative, bus-visible description of one
//! service: name, address, groups, property map and the interfaces it
//! accepts or emits. Controllers decide which optional interfaces a
//! specification ends up with; once declared, the set never shrinks.

use hubframe_bus::{Address, ValueType};
use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known property keys.
pub mod props {
    pub const SUP_UNITS: &str = "sup_units";
    pub const SUP_EXPORT_UNITS: &str = "sup_export_units";
    pub const SUP_EXTENDED_VALS: &str = "sup_extended_vals";
    pub const SUP_MODES: &str = "sup_modes";
    pub const SUP_CHARGING_MODES: &str = "sup_charging_modes";
    pub const SUP_PHASE_MODES: &str = "sup_phase_modes";
    pub const SUP_MAX_CURRENT: &str = "sup_max_current";
    pub const SUP_EVENTS: &str = "sup_events";
    pub const MIN_CURRENT: &str = "min_current";
    pub const MAX_LVL: &str = "max_lvl";
    pub const MIN_LVL: &str = "min_lvl";
    pub const SUPPORT_DURATION: &str = "support_duration";
    pub const SUPPORT_START_LEVEL: &str = "support_start_level";
    pub const REQ_PARAM_SIZES: &str = "req_param_sizes";
    pub const IS_VIRTUAL: &str = "is_virtual";
}

/// Interface direction: a command the service accepts, or an event it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// One declared command or event of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interface {
    pub direction: Direction,
    /// Message type, e.g. `cmd.lvl.set`.
    pub message_type: String,
    pub value_type: ValueType,
    pub version: String,
}

impl Interface {
    /// An accepted command.
    pub fn cmd(message_type: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            direction: Direction::In,
            message_type: message_type.into(),
            value_type,
            version: "1".to_string(),
        }
    }

    /// An emitted event.
    pub fn evt(message_type: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            direction: Direction::Out,
            message_type: message_type.into(),
            value_type,
            version: "1".to_string(),
        }
    }
}

/// Declarative description of one service on a thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpecification {
    pub name: String,
    /// Full bus address of the service (spec form, no `pt`/`mt`).
    pub address: Address,
    pub groups: Vec<String>,
    pub enabled: bool,
    /// Property map; values are JSON so domain-specific shapes fit.
    pub props: HashMap<String, serde_json::Value>,
    pub interfaces: Vec<Interface>,
}

impl ServiceSpecification {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            groups: vec!["ch_0".to_string()],
            enabled: true,
            props: HashMap::new(),
            interfaces: Vec::new(),
        }
    }

    /// Replace the group list.
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Set a property, builder style.
    pub fn with_prop(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Thing address part of the service address.
    pub fn thing_address(&self) -> &str {
        self.address.service_address.as_deref().unwrap_or_default()
    }

    /// Spec-form address string, the bus-wide unique id of the service.
    pub fn full_address(&self) -> String {
        self.address.to_spec_address()
    }

    /// A string property.
    pub fn prop_string(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(|v| v.as_str())
    }

    /// An integer property.
    pub fn prop_int(&self, key: &str) -> Option<i64> {
        self.props.get(key).and_then(|v| v.as_i64())
    }

    /// A boolean property; absent counts as `false`.
    pub fn prop_bool(&self, key: &str) -> bool {
        self.props
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// A string-array property; absent yields an empty list.
    pub fn prop_str_array(&self, key: &str) -> Vec<String> {
        self.props
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Case-insensitive membership test against a string-array property,
    /// returning the canonical (declared) form.
    pub fn normalize_against(&self, key: &str, candidate: &str) -> Option<String> {
        self.prop_str_array(key)
            .into_iter()
            .find(|declared| declared.eq_ignore_ascii_case(candidate))
    }

    /// Add any of `interfaces` not yet declared. Never removes.
    pub fn ensure_interfaces(&mut self, interfaces: Vec<Interface>) {
        for interface in interfaces {
            if !self.interfaces.contains(&interface) {
                self.interfaces.push(interface);
            }
        }
    }

    /// Whether the service declares an interface for `message_type`.
    pub fn has_interface(&self, message_type: &str) -> bool {
        self.interfaces
            .iter()
            .any(|i| i.message_type == message_type)
    }

    /// Require a string-array property to be present and non-empty.
    pub fn require_str_array(&self, key: &str) -> Result<Vec<String>> {
        let values = self.prop_str_array(key);
        if values.is_empty() {
            return Err(Error::Validation(format!(
                "service {} does not declare {key}",
                self.name
            )));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServiceSpecification {
        ServiceSpecification::new(
            "chargepoint",
            Address::service("easee", "1", "chargepoint", "4"),
        )
        .with_prop(
            props::SUP_CHARGING_MODES,
            serde_json::json!(["normal", "slow"]),
        )
        .with_prop(props::SUP_MAX_CURRENT, serde_json::json!(32))
    }

    #[test]
    fn test_props_accessors() {
        let s = spec();
        assert_eq!(s.prop_int(props::SUP_MAX_CURRENT), Some(32));
        assert_eq!(
            s.prop_str_array(props::SUP_CHARGING_MODES),
            vec!["normal", "slow"]
        );
        assert!(!s.prop_bool(props::IS_VIRTUAL));
        assert_eq!(s.thing_address(), "4");
        assert_eq!(s.full_address(), "/rt:dev/rn:easee/ad:1/sv:chargepoint/ad:4");
    }

    #[test]
    fn test_normalize_against_is_case_insensitive() {
        let s = spec();
        assert_eq!(
            s.normalize_against(props::SUP_CHARGING_MODES, "Normal"),
            Some("normal".to_string())
        );
        assert_eq!(s.normalize_against(props::SUP_CHARGING_MODES, "dummy"), None);
    }

    #[test]
    fn test_ensure_interfaces_never_duplicates() {
        let mut s = spec();
        let iface = Interface::cmd("cmd.charge.start", ValueType::Null);
        s.ensure_interfaces(vec![iface.clone()]);
        s.ensure_interfaces(vec![iface]);
        assert_eq!(s.interfaces.len(), 1);
        assert!(s.has_interface("cmd.charge.start"));
    }
}
