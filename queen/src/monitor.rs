//! Fleet monitor
//!
//! Periodically reconciles the fleet against the master drone manifest:
//! drones marked `to_run` that have no live bus client get started, drones
//! not marked `to_run` that are live get stopped. Drones with a standing
//! override are left alone until the override expires. One failing target
//! never blocks the rest of the tick, and one failing tick never stops the
//! monitor.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use apiary_shared::bus::MessageBus;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::control::{DroneControl, CLIENT_NAME_PREFIX};

/// What one reconcile tick did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

pub struct FleetMonitor {
    control: Arc<DroneControl>,
    bus: Arc<dyn MessageBus>,
    interval: Duration,
}

impl FleetMonitor {
    pub fn new(control: Arc<DroneControl>, bus: Arc<dyn MessageBus>, interval: Duration) -> Self {
        Self {
            control,
            bus,
            interval,
        }
    }

    /// Reconcile forever. Returns only on panic-free cancellation by the
    /// caller dropping the future.
    pub async fn run(&self) {
        info!(interval_s = self.interval.as_secs(), "fleet monitor running");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(report) if report.started.is_empty() && report.stopped.is_empty() => {
                    debug!("fleet reconciled, nothing to do");
                }
                Ok(report) => {
                    info!(started = ?report.started, stopped = ?report.stopped, "fleet reconciled");
                }
                Err(e) => warn!(error = %e, "monitor tick failed"),
            }
        }
    }

    /// One reconcile pass over the manifest.
    pub async fn tick(&self) -> Result<TickReport> {
        let manifest = self.control.manifest.load()?;
        let overrides = self.control.overrides.prune(Utc::now())?;

        let live: BTreeSet<String> = self
            .bus
            .client_list()
            .await?
            .into_iter()
            .filter_map(|c| c.name.strip_prefix(CLIENT_NAME_PREFIX).map(str::to_string))
            .collect();

        let mut report = TickReport::default();
        for (key, entry) in &manifest {
            if overrides.contains_key(key) {
                debug!(key, "override active, leaving drone alone");
                continue;
            }
            let running = live.contains(key);
            if entry.to_run && !running {
                match self.control.start_unit(&entry.ip, key).await {
                    Ok(()) => report.started.push(key.clone()),
                    Err(e) => warn!(key, error = %e, "monitor failed to start drone"),
                }
            } else if !entry.to_run && running {
                match self.control.stop_unit(&entry.ip, key).await {
                    Ok(()) => report.stopped.push(key.clone()),
                    Err(e) => warn!(key, error = %e, "monitor failed to stop drone"),
                }
            }
        }

        Ok(report)
    }
}
