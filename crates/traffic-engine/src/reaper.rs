//! Periodic index-convergence sweeps
//!
//! Two independent tickers, one per sweep. Each tick takes however long
//! the sweep takes and the next one fires after
//! `max(0, interval − elapsed)`. The tickers start with different
//! initial delays so the two sweeps do not repeatedly contend on the
//! writer lock. Sweep errors are logged and never stop a ticker; the
//! tasks run until process exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::manager::TrafficManager;

pub struct Reaper {
    manager: Arc<TrafficManager>,
    interval: Duration,
}

impl Reaper {
    pub fn new(manager: Arc<TrafficManager>, cleanup_interval_secs: u64) -> Self {
        Self {
            manager,
            interval: Duration::from_secs(cleanup_interval_secs),
        }
    }

    /// Spawn both sweep tasks and return their handles.
    pub fn spawn(self) -> (JoinHandle<()>, JoinHandle<()>) {
        let traffic = {
            let manager = self.manager.clone();
            let interval = self.interval;
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                loop {
                    let started = Instant::now();
                    debug!("dead-traffic sweep starting");
                    if let Err(err) = manager.sweep_dead_traffic().await {
                        error!(error = %err, "dead-traffic sweep failed");
                    }
                    tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
                }
            })
        };

        let ports = {
            let manager = self.manager;
            let interval = self.interval;
            tokio::spawn(async move {
                // offset from the traffic sweep by half an interval
                tokio::time::sleep(interval + interval / 2).await;
                loop {
                    let started = Instant::now();
                    debug!("dead-port sweep starting");
                    if let Err(err) = manager.sweep_dead_ports().await {
                        error!(error = %err, "dead-port sweep failed");
                    }
                    tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
                }
            })
        };

        (traffic, ports)
    }
}
