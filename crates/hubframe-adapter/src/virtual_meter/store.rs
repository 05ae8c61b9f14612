//! Persistence for virtual-meter state.
//!
//! Two tables: `device` holds one record per virtual-meter address,
//! `reportingInterval` holds the shared reporting interval as a Go-style
//! duration string (`30m0s`), which is what older installations have on
//! disk.

use chrono::{DateTime, Utc};
use hubframe_core::{Error, Result};
use hubframe_storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const DEVICE_TABLE: &str = "device";
pub const INTERVAL_TABLE: &str = "reportingInterval";
const INTERVAL_KEY: &str = "interval";

/// Reporting interval used until one is persisted.
pub const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Persisted state of one virtual meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// `mode → watts`. `None` until configured the first time.
    pub modes: Option<HashMap<String, f64>>,
    pub current_mode: String,
    /// Duty fraction in `[0, 1]`.
    pub level: f64,
    /// kWh. Monotonically non-decreasing.
    pub accumulated_energy: f64,
    pub last_recalculation_at: Option<DateTime<Utc>>,
    pub unit: String,
    /// Mirrors device connectivity; no energy accrues while `false`.
    pub active: bool,
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self {
            modes: None,
            current_mode: "off".to_string(),
            level: 0.0,
            accumulated_energy: 0.0,
            last_recalculation_at: None,
            unit: "W".to_string(),
            active: true,
        }
    }
}

impl DeviceRecord {
    /// Whether the meter has ever been configured with modes.
    pub fn is_initialised(&self) -> bool {
        self.modes.as_ref().map(|m| !m.is_empty()).unwrap_or(false)
    }

    /// Power currently drawn, watts. Zero for unconfigured records or an
    /// unknown mode.
    pub fn power(&self) -> f64 {
        self.modes
            .as_ref()
            .and_then(|m| m.get(&self.current_mode))
            .map(|watts| watts * self.level)
            .unwrap_or(0.0)
    }
}

/// Render a duration the way Go's `time.Duration` prints it (`1h30m0s`).
pub fn format_go_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if h > 0 || m > 0 {
        out.push_str(&format!("{m}m"));
    }
    out.push_str(&format!("{s}s"));
    out
}

/// Parse a Go-style duration string limited to `h`/`m`/`s` components.
pub fn parse_go_duration(s: &str) -> Result<Duration> {
    let mut total = 0u64;
    let mut digits = String::new();
    let mut seen_component = false;
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| Error::Storage(format!("invalid duration: {s}")))?;
        digits.clear();
        seen_component = true;
        total += match c {
            'h' => value * 3600,
            'm' => value * 60,
            's' => value,
            _ => return Err(Error::Storage(format!("invalid duration unit in: {s}"))),
        };
    }
    if !digits.is_empty() || !seen_component {
        return Err(Error::Storage(format!("invalid duration: {s}")));
    }
    Ok(Duration::from_secs(total))
}

/// Storage facade used by the virtual-meter manager.
#[derive(Clone)]
pub struct VirtualMeterStorage {
    store: KeyValueStore,
}

impl VirtualMeterStorage {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub fn device(&self, address: &str) -> Result<Option<DeviceRecord>> {
        self.store.get(DEVICE_TABLE, address)
    }

    pub fn set_device(&self, address: &str, record: &DeviceRecord) -> Result<()> {
        self.store.set(DEVICE_TABLE, address, record)
    }

    pub fn delete_device(&self, address: &str) -> Result<bool> {
        self.store.delete(DEVICE_TABLE, address)
    }

    pub fn devices(&self) -> Result<Vec<(String, DeviceRecord)>> {
        self.store.list(DEVICE_TABLE)
    }

    /// The persisted reporting interval, or the 30-minute default.
    pub fn reporting_interval(&self) -> Result<Duration> {
        match self.store.get::<String>(INTERVAL_TABLE, INTERVAL_KEY)? {
            None => Ok(DEFAULT_REPORTING_INTERVAL),
            Some(s) => parse_go_duration(&s),
        }
    }

    pub fn set_reporting_interval(&self, interval: Duration) -> Result<()> {
        self.store
            .set(INTERVAL_TABLE, INTERVAL_KEY, &format_go_duration(interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubframe_storage::MemoryBackend;
    use std::sync::Arc;

    fn storage() -> VirtualMeterStorage {
        VirtualMeterStorage::new(KeyValueStore::new(Arc::new(MemoryBackend::new())))
    }

    #[test]
    fn test_go_duration_round_trip() {
        for (d, s) in [
            (Duration::from_secs(30 * 60), "30m0s"),
            (Duration::from_secs(90 * 60), "1h30m0s"),
            (Duration::from_secs(45), "45s"),
            (Duration::from_secs(3600), "1h0m0s"),
        ] {
            assert_eq!(format_go_duration(d), s);
            assert_eq!(parse_go_duration(s).unwrap(), d);
        }
        assert!(parse_go_duration("fast").is_err());
        assert!(parse_go_duration("30x").is_err());
    }

    #[test]
    fn test_interval_default_and_persist() {
        let storage = storage();
        assert_eq!(
            storage.reporting_interval().unwrap(),
            DEFAULT_REPORTING_INTERVAL
        );
        storage
            .set_reporting_interval(Duration::from_secs(600))
            .unwrap();
        assert_eq!(
            storage.reporting_interval().unwrap(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_record_round_trip_uses_camel_case() {
        let storage = storage();
        let mut record = DeviceRecord::default();
        record.modes = Some(HashMap::from([("on".to_string(), 100.0)]));
        record.current_mode = "on".to_string();
        record.level = 0.5;
        record.last_recalculation_at = Some(Utc::now());
        storage.set_device("/rt:dev/rn:zw/ad:1/sv:virtual_meter_elec/ad:3", &record).unwrap();

        let loaded = storage
            .device("/rt:dev/rn:zw/ad:1/sv:virtual_meter_elec/ad:3")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, record);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("accumulatedEnergy").is_some());
        assert!(json.get("lastRecalculationAt").is_some());
    }

    #[test]
    fn test_power_of_unknown_mode_is_zero() {
        let mut record = DeviceRecord::default();
        assert_eq!(record.power(), 0.0);
        record.modes = Some(HashMap::from([("on".to_string(), 80.0)]));
        record.current_mode = "dim".to_string();
        record.level = 1.0;
        assert_eq!(record.power(), 0.0);
        record.current_mode = "on".to_string();
        assert_eq!(record.power(), 80.0);
    }
}
