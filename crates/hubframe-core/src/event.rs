//! Adapter event model.
//!
//! Events flow between services inside one adapter process: a level switch
//! that published a new level, a thing that went offline, an inclusion
//! report that was (re)sent. The virtual-meter listener is the main
//! consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event classes used by subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// A level report was published for a service.
    Level,
    /// A thing's connectivity changed.
    Connectivity,
    /// An inclusion report was sent for a thing.
    InclusionReportSent,
    /// A thing's service set changed at runtime.
    ThingUpdated,
}

/// Level change published by an out-level-switch service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelEvent {
    /// Thing address of the service that reported.
    pub address: String,
    /// Raw level as reported by the vendor.
    pub level: i64,
    /// Whether the reporting cache considered this a change.
    pub has_changed: bool,
}

/// Connectivity change for a thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    /// Thing address.
    pub address: String,
    /// True when the connection is up.
    pub connected: bool,
}

/// Inclusion report (re)emission notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionEvent {
    /// Thing address the report was sent for.
    pub address: String,
}

/// Events published on the in-process adapter bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum AdapterEvent {
    Level(LevelEvent),
    Connectivity(ConnectivityEvent),
    InclusionReportSent(InclusionEvent),
    ThingUpdated { address: String },
}

impl AdapterEvent {
    /// The class of this event, for filter matching.
    pub fn class(&self) -> EventClass {
        match self {
            AdapterEvent::Level(_) => EventClass::Level,
            AdapterEvent::Connectivity(_) => EventClass::Connectivity,
            AdapterEvent::InclusionReportSent(_) => EventClass::InclusionReportSent,
            AdapterEvent::ThingUpdated { .. } => EventClass::ThingUpdated,
        }
    }

    /// Thing address the event refers to.
    pub fn address(&self) -> &str {
        match self {
            AdapterEvent::Level(e) => &e.address,
            AdapterEvent::Connectivity(e) => &e.address,
            AdapterEvent::InclusionReportSent(e) => &e.address,
            AdapterEvent::ThingUpdated { address } => address,
        }
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event id.
    pub id: Uuid,
    /// Component that published the event.
    pub source: String,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    /// Create metadata for a new event.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_class_and_address() {
        let ev = AdapterEvent::Level(LevelEvent {
            address: "7".to_string(),
            level: 42,
            has_changed: true,
        });
        assert_eq!(ev.class(), EventClass::Level);
        assert_eq!(ev.address(), "7");

        let ev = AdapterEvent::Connectivity(ConnectivityEvent {
            address: "9".to_string(),
            connected: false,
        });
        assert_eq!(ev.class(), EventClass::Connectivity);
        assert_eq!(ev.address(), "9");
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let ev = AdapterEvent::InclusionReportSent(InclusionEvent {
            address: "12".to_string(),
        });
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("inclusion_report_sent"));
        let back: AdapterEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
