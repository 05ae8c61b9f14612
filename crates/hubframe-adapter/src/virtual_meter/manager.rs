//! Virtual-meter state owner.
//!
//! The manager owns every device record, performs the energy integration
//! and mediates attaching/detaching the synthesised numeric meter. It takes
//! the adapter registry through a setter: the registry creates things that
//! reach back into the manager, so neither side can own the other at
//! construction time.

use crate::meter::{MeterControllers, MeterReporter, MeterService};
use crate::outlvlswitch;
use crate::registry::{AdapterRegistry, Registry};
use crate::spec::{props, ServiceSpecification};
use crate::virtual_meter::service::{VirtualMeterService, SERVICE_NAME};
use crate::virtual_meter::store::{DeviceRecord, VirtualMeterStorage};
use async_trait::async_trait;
use chrono::Utc;
use hubframe_bus::Publisher;
use hubframe_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Name of the synthesised numeric meter.
const METER_ELEC: &str = "meter_elec";

/// How often the integration advances on its own.
pub const DEFAULT_RECALCULATION_PERIOD: Duration = Duration::from_secs(30);

struct ManagerState {
    registry: Option<Arc<AdapterRegistry>>,
    /// Things whose next level event must be treated as a change.
    required_updates: HashSet<String>,
}

pub struct VirtualMeterManager {
    storage: VirtualMeterStorage,
    publisher: Arc<dyn Publisher>,
    recalculation_period: Duration,
    state: Mutex<ManagerState>,
}

impl VirtualMeterManager {
    pub fn new(storage: VirtualMeterStorage, publisher: Arc<dyn Publisher>) -> Arc<Self> {
        Arc::new(Self {
            storage,
            publisher,
            recalculation_period: DEFAULT_RECALCULATION_PERIOD,
            state: Mutex::new(ManagerState {
                registry: None,
                required_updates: HashSet::new(),
            }),
        })
    }

    pub fn with_recalculation_period(self: Arc<Self>, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            storage: self.storage.clone(),
            publisher: self.publisher.clone(),
            recalculation_period: period,
            state: Mutex::new(ManagerState {
                registry: None,
                required_updates: HashSet::new(),
            }),
        })
    }

    /// Attach the adapter registry; must happen before any thing handling.
    pub async fn set_adapter(&self, registry: Arc<AdapterRegistry>) {
        self.state.lock().await.registry = Some(registry);
    }

    async fn registry(&self) -> Result<Arc<AdapterRegistry>> {
        self.state
            .lock()
            .await
            .registry
            .clone()
            .ok_or_else(|| Error::Validation("virtual meter manager has no adapter".to_string()))
    }

    /// Records are keyed by the virtual-meter service's full address.
    fn device_key(registry: &AdapterRegistry, thing_address: &str) -> String {
        registry
            .service_address(SERVICE_NAME, thing_address)
            .to_spec_address()
    }

    /// Inspect a freshly registered thing; things with an out-level-switch
    /// get the virtual-meter service, and, when previously configured, the
    /// synthesised numeric meter too.
    pub async fn register_thing(self: &Arc<Self>, thing_address: &str) -> Result<()> {
        let registry = self.registry().await?;
        let report = registry
            .thing(thing_address)
            .await
            .ok_or_else(|| Error::NotFound(format!("thing {thing_address} not registered")))?;
        let Some(switch) = report
            .services
            .iter()
            .find(|s| s.name == outlvlswitch::SERVICE_NAME)
        else {
            return Ok(());
        };
        let groups = switch.groups.clone();

        let key = Self::device_key(&registry, thing_address);
        let record = match self.storage.device(&key)? {
            Some(record) => record,
            None => {
                let placeholder = DeviceRecord::default();
                self.storage.set_device(&key, &placeholder)?;
                placeholder
            }
        };

        let spec = ServiceSpecification::new(
            SERVICE_NAME,
            registry.service_address(SERVICE_NAME, thing_address),
        )
        .with_groups(groups.clone())
        .with_prop(props::SUP_UNITS, serde_json::json!(["W", "kWh"]))
        .with_prop(props::SUP_MODES, serde_json::json!(["on", "off"]));
        let service = VirtualMeterService::new(spec, self.clone(), self.publisher.clone());
        registry
            .add_service(thing_address, Arc::new(service))
            .await?;

        if record.is_initialised() {
            self.attach_numeric_meter(&registry, thing_address, groups)
                .await?;
        }
        Ok(())
    }

    async fn attach_numeric_meter(
        self: &Arc<Self>,
        registry: &Arc<AdapterRegistry>,
        thing_address: &str,
        groups: Vec<String>,
    ) -> Result<()> {
        let spec = ServiceSpecification::new(
            METER_ELEC,
            registry.service_address(METER_ELEC, thing_address),
        )
        .with_groups(groups)
        .with_prop(props::SUP_UNITS, serde_json::json!(["W", "kWh"]))
        .with_prop(props::IS_VIRTUAL, serde_json::json!(true));
        let reporter = Arc::new(VirtualMeterReporter {
            manager: self.clone(),
            thing_address: thing_address.to_string(),
        });
        let service = MeterService::new(
            spec,
            MeterControllers {
                reporter,
                export: None,
                extended: None,
                reset: None,
            },
            self.publisher.clone(),
        );
        registry.add_service(thing_address, Arc::new(service)).await
    }

    /// Configure the power map. Validation against the declared mode/unit
    /// sets happens in the service layer; the manager enforces record-level
    /// consistency.
    pub async fn add_meter(
        self: &Arc<Self>,
        thing_address: &str,
        modes: HashMap<String, f64>,
        unit: String,
    ) -> Result<()> {
        let registry = self.registry().await?;
        let key = Self::device_key(&registry, thing_address);

        let mut record = self.storage.device(&key)?.unwrap_or_default();
        let was_initialised = record.is_initialised();
        if was_initialised {
            // A new power map must not rewrite history: settle the energy
            // accrued under the old map first.
            self.recalculate_energy(true, &mut record)?;
        }
        record.modes = Some(modes);
        record.unit = unit;
        if record.last_recalculation_at.is_none() {
            record.last_recalculation_at = Some(Utc::now());
        }
        self.storage.set_device(&key, &record)?;

        if !was_initialised {
            info!(thing = %thing_address, "virtual meter configured, attaching numeric meter");
            self.state
                .lock()
                .await
                .required_updates
                .insert(thing_address.to_string());
            let groups = registry
                .thing(thing_address)
                .await
                .map(|t| t.groups)
                .unwrap_or_default();
            self.attach_numeric_meter(&registry, thing_address, groups)
                .await?;
            registry.send_inclusion_report(thing_address).await?;
        }
        Ok(())
    }

    /// Clear the configuration and detach the numeric meter. Idempotent.
    pub async fn remove_meter(self: &Arc<Self>, thing_address: &str) -> Result<()> {
        let registry = self.registry().await?;
        let key = Self::device_key(&registry, thing_address);

        let had_config = self
            .storage
            .device(&key)?
            .map(|r| r.is_initialised())
            .unwrap_or(false);
        let active = self
            .storage
            .device(&key)?
            .map(|r| r.active)
            .unwrap_or(true);
        self.storage.set_device(
            &key,
            &DeviceRecord {
                active,
                ..DeviceRecord::default()
            },
        )?;
        self.state
            .lock()
            .await
            .required_updates
            .remove(thing_address);

        let detached = registry.remove_service(thing_address, METER_ELEC).await?;
        if had_config || detached {
            registry.send_inclusion_report(thing_address).await?;
        }
        Ok(())
    }

    /// Whether the thing's next level event must be applied even when the
    /// level looks unchanged.
    pub async fn update_required(&self, thing_address: &str) -> bool {
        self.state
            .lock()
            .await
            .required_updates
            .contains(thing_address)
    }

    /// Apply a level change: settle energy under the old mode/level, then
    /// switch over.
    pub async fn update(&self, thing_address: &str, mode: &str, level: f64) -> Result<()> {
        let registry = self.registry().await?;
        let key = Self::device_key(&registry, thing_address);
        let Some(mut record) = self.storage.device(&key)? else {
            return Ok(());
        };
        if !record.is_initialised() {
            debug!(thing = %thing_address, "level event for unconfigured virtual meter");
            return Ok(());
        }

        self.recalculate_energy(true, &mut record)?;
        record.current_mode = mode.to_string();
        record.level = level;
        self.storage.set_device(&key, &record)?;
        self.state
            .lock()
            .await
            .required_updates
            .remove(thing_address);
        Ok(())
    }

    /// Track connectivity; inactive meters accrue no energy.
    pub async fn set_active(&self, thing_address: &str, active: bool) -> Result<()> {
        let registry = self.registry().await?;
        let key = Self::device_key(&registry, thing_address);
        let Some(mut record) = self.storage.device(&key)? else {
            return Ok(());
        };
        if record.active != active {
            record.active = active;
            self.storage.set_device(&key, &record)?;
        }
        Ok(())
    }

    /// Advance the integration. Returns whether the record changed.
    ///
    /// The elapsed time is capped at twice the recalculation period, so a
    /// clock jump or a long offline stretch adds a bounded amount of
    /// energy. `accumulated_energy` never decreases.
    pub fn recalculate_energy(&self, force: bool, record: &mut DeviceRecord) -> Result<bool> {
        if !record.active {
            return Ok(false);
        }
        let now = Utc::now();
        let Some(last) = record.last_recalculation_at else {
            record.last_recalculation_at = Some(now);
            return Ok(true);
        };

        let period_hours = self.recalculation_period.as_secs_f64() / 3600.0;
        let elapsed_hours = (now - last).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours < 0.0 {
            // Clock moved backwards; restart the interval.
            record.last_recalculation_at = Some(now);
            return Ok(true);
        }
        if !force && elapsed_hours < period_hours {
            return Ok(false);
        }

        let capped_hours = elapsed_hours.min(2.0 * period_hours);
        record.accumulated_energy += capped_hours * record.power() / 1000.0;
        record.last_recalculation_at = Some(now);
        Ok(true)
    }

    /// Current reading for the synthesised numeric meter.
    pub async fn report(&self, thing_address: &str, unit: &str) -> Result<f64> {
        let registry = self.registry().await?;
        let key = Self::device_key(&registry, thing_address);
        let mut record = self
            .storage
            .device(&key)?
            .ok_or_else(|| Error::NotFound(format!("no virtual meter for {thing_address}")))?;
        if self.recalculate_energy(false, &mut record)? {
            self.storage.set_device(&key, &record)?;
        }
        match unit {
            "W" => Ok(record.power()),
            "kWh" => Ok(record.accumulated_energy),
            other => Err(Error::Validation(format!(
                "unsupported virtual meter unit: {other}"
            ))),
        }
    }

    /// The configured mode map; empty when unconfigured or removed.
    pub async fn modes(&self, thing_address: &str) -> Result<HashMap<String, f64>> {
        let registry = self.registry().await?;
        let key = Self::device_key(&registry, thing_address);
        Ok(self
            .storage
            .device(&key)?
            .and_then(|r| r.modes)
            .unwrap_or_default())
    }

    pub fn reporting_interval(&self) -> Result<Duration> {
        self.storage.reporting_interval()
    }

    pub fn set_reporting_interval(&self, interval: Duration) -> Result<()> {
        self.storage.set_reporting_interval(interval)
    }
}

/// Bridge giving the synthesised numeric meter its readings.
struct VirtualMeterReporter {
    manager: Arc<VirtualMeterManager>,
    thing_address: String,
}

#[async_trait]
impl MeterReporter for VirtualMeterReporter {
    async fn meter_report(&self, unit: &str) -> Result<f64> {
        self.manager.report(&self.thing_address, unit).await
    }
}
