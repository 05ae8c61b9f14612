//! Reporting cache and strategies.
//!
//! The cache remembers, per `(event type, sub-key)`, the last value a
//! service published and when. A [`ReportingStrategy`] turns that record
//! plus a candidate value into a publish/skip decision.

use chrono::{DateTime, Utc};
use hubframe_bus::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Policy deciding whether a new value justifies a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingStrategy {
    /// Publish only when the value differs from the last reported one.
    ReportOnChangeOnly,
    /// Publish on change, and in any case when the last report is older
    /// than the given duration.
    ReportAtLeastEvery(Duration),
}

impl ReportingStrategy {
    fn report_required(&self, entry: Option<&CacheEntry>, value: &Value, now: DateTime<Utc>) -> bool {
        let Some(entry) = entry else {
            return true;
        };
        if entry.last_reported != *value {
            return true;
        }
        match self {
            ReportingStrategy::ReportOnChangeOnly => false,
            ReportingStrategy::ReportAtLeastEvery(period) => {
                let elapsed = now.signed_duration_since(entry.last_reported_at);
                elapsed.to_std().map(|e| e >= *period).unwrap_or(false)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    last_reported: Value,
    last_reported_at: DateTime<Utc>,
}

/// Last-reported-value cache, internally synchronised.
#[derive(Default)]
pub struct ReportingCache {
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl ReportingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure query: should `value` be published under `strategy`? Never
    /// mutates the cache.
    pub fn report_required(
        &self,
        strategy: ReportingStrategy,
        event_type: &str,
        sub_key: &str,
        value: &Value,
    ) -> bool {
        let entries = self.entries.lock();
        let entry = entries.get(&(event_type.to_string(), sub_key.to_string()));
        strategy.report_required(entry, value, Utc::now())
    }

    /// Whether `value` differs from the cached one (or nothing is cached).
    pub fn has_changed(&self, event_type: &str, sub_key: &str, value: &Value) -> bool {
        let entries = self.entries.lock();
        match entries.get(&(event_type.to_string(), sub_key.to_string())) {
            None => true,
            Some(entry) => entry.last_reported != *value,
        }
    }

    /// Record a successful publish.
    pub fn reported(&self, event_type: &str, sub_key: &str, value: Value) {
        self.entries.lock().insert(
            (event_type.to_string(), sub_key.to_string()),
            CacheEntry {
                last_reported: value,
                last_reported_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_report_always_required() {
        let cache = ReportingCache::new();
        assert!(cache.report_required(
            ReportingStrategy::ReportOnChangeOnly,
            "evt.lvl.report",
            "",
            &Value::Int(10),
        ));
    }

    #[test]
    fn test_on_change_only_suppresses_equal_value() {
        let cache = ReportingCache::new();
        cache.reported("evt.lvl.report", "", Value::Int(10));
        assert!(!cache.report_required(
            ReportingStrategy::ReportOnChangeOnly,
            "evt.lvl.report",
            "",
            &Value::Int(10),
        ));
        assert!(cache.report_required(
            ReportingStrategy::ReportOnChangeOnly,
            "evt.lvl.report",
            "",
            &Value::Int(11),
        ));
    }

    #[test]
    fn test_sub_keys_are_independent() {
        let cache = ReportingCache::new();
        cache.reported("evt.meter.report", "W", Value::Float(5.0));
        assert!(cache.report_required(
            ReportingStrategy::ReportOnChangeOnly,
            "evt.meter.report",
            "kWh",
            &Value::Float(5.0),
        ));
    }

    #[test]
    fn test_at_least_every_elapsed_window() {
        let cache = ReportingCache::new();
        cache.reported("evt.meter.report", "W", Value::Float(5.0));
        // Zero window: any repeated value is due again immediately.
        assert!(cache.report_required(
            ReportingStrategy::ReportAtLeastEvery(Duration::ZERO),
            "evt.meter.report",
            "W",
            &Value::Float(5.0),
        ));
        // Wide window: the repeated value is suppressed.
        assert!(!cache.report_required(
            ReportingStrategy::ReportAtLeastEvery(Duration::from_secs(3600)),
            "evt.meter.report",
            "W",
            &Value::Float(5.0),
        ));
    }

    #[test]
    fn test_query_never_mutates() {
        let cache = ReportingCache::new();
        for _ in 0..3 {
            assert!(cache.report_required(
                ReportingStrategy::ReportOnChangeOnly,
                "evt.lvl.report",
                "",
                &Value::Int(1),
            ));
        }
    }
}
