//! Periodic reporting tasks.
//!
//! One task per capability service type. Every tick, all voters must agree
//! before the handler runs over the services carrying the task's name.
//! Handler errors are logged and never stop the schedule.

use crate::registry::Registry;
use crate::service::Service;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Predicate consulted before each tick.
#[async_trait]
pub trait Voter: Send + Sync {
    async fn vote(&self) -> bool;
}

/// Votes yes once the registry's initial thing sync has completed.
pub struct RegistryInitializedVoter {
    registry: Arc<dyn Registry>,
}

impl RegistryInitializedVoter {
    pub fn new(registry: Arc<dyn Registry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }
}

#[async_trait]
impl Voter for RegistryInitializedVoter {
    async fn vote(&self) -> bool {
        self.registry.is_initialized().await
    }
}

/// Sends the unforced reports of one service.
#[async_trait]
pub trait ReportHandler: Send + Sync {
    async fn send_reports(&self, service: Arc<dyn Service>) -> hubframe_core::Result<()>;
}

/// A periodic report schedule for one service type.
pub struct ReportingTask {
    service_name: String,
    frequency: Duration,
    voters: Vec<Arc<dyn Voter>>,
    handler: Arc<dyn ReportHandler>,
    registry: Arc<dyn Registry>,
}

impl ReportingTask {
    pub fn new(
        service_name: impl Into<String>,
        frequency: Duration,
        handler: Arc<dyn ReportHandler>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            frequency,
            voters: Vec::new(),
            handler,
            registry,
        }
    }

    pub fn with_voter(mut self, voter: Arc<dyn Voter>) -> Self {
        self.voters.push(voter);
        self
    }

    /// Spawn the schedule. Runs until aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.frequency);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; skip it
            // so the first report waits a full period.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    async fn tick(&self) {
        for voter in &self.voters {
            if !voter.vote().await {
                debug!(service = %self.service_name, "reporting tick vetoed");
                return;
            }
        }
        for service in self.registry.services_by_name(&self.service_name).await {
            if self.registry.is_skipped(service.thing_address()).await {
                debug!(
                    service = %self.service_name,
                    thing = %service.thing_address(),
                    "skipping reports for flagged thing"
                );
                continue;
            }
            if let Err(e) = self.handler.send_reports(service.clone()).await {
                warn!(
                    service = %self.service_name,
                    thing = %service.thing_address(),
                    error = %e,
                    "periodic report failed"
                );
            }
        }
    }
}
