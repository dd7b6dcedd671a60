//! Thermal watchdog.
//!
//! The only task that talks to the sensor. Once per period it samples,
//! publishes the reading and lets the interlock trip the coil above the hard
//! limit. Between samples it idles until the next deadline, waking early for
//! a stop request or for a recheck after the coil was turned on.

use crate::error::{InterlockError, Result};
use crate::interlock::{CoilInterlock, OffReason};
use crate::sensor::SensorLink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

/// Counters returned when the watchdog exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogReport {
    pub cycles: u64,
    pub trips: u32,
    pub rechecks: u32,
    pub sensor_faults: u32,
}

enum Wake {
    Deadline,
    Recheck,
    Stop,
}

pub struct ThermalWatchdog {
    sensor: SensorLink,
    interlock: Arc<CoilInterlock>,
    period: Duration,
    stop: watch::Receiver<bool>,
}

impl ThermalWatchdog {
    /// Spawns the watchdog on the current Tokio runtime. The sensor link is
    /// moved into the task, which makes the task its only user.
    pub fn spawn(sensor: SensorLink, interlock: Arc<CoilInterlock>, period: Duration) -> WatchdogHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let watchdog = Self {
            sensor,
            interlock,
            period,
            stop: stop_rx,
        };

        info!(period_ms = period.as_millis() as u64, "thermal watchdog starting");
        WatchdogHandle {
            stop: stop_tx,
            task: tokio::spawn(watchdog.run()),
        }
    }

    async fn run(mut self) -> WatchdogReport {
        let mut report = WatchdogReport::default();

        while !*self.stop.borrow() {
            let deadline = Instant::now() + self.period;

            self.check(&mut report).await;
            report.cycles += 1;

            match self.idle_until(deadline).await {
                Wake::Deadline => {}
                Wake::Recheck => report.rechecks += 1,
                Wake::Stop => break,
            }
        }

        info!(cycles = report.cycles, trips = report.trips, "thermal watchdog stopped");
        report
    }

    async fn check(&mut self, report: &mut WatchdogReport) {
        match self.sensor.sample().await {
            Ok(reading) => match self.interlock.publish_sample(reading) {
                Ok(true) => report.trips += 1,
                Ok(false) => debug!(ticks = reading.ticks(), "temperature sampled"),
                Err(e) => error!(error = %e, "failed to trip heating coil"),
            },
            Err(e) => {
                // No retry. The coil is cut and the previous reading stands.
                report.sensor_faults += 1;
                error!(error = %e, "sensor transfer failed");
                if let Err(e) = self.interlock.force_off(OffReason::SensorIo) {
                    error!(error = %e, "failed to turn heating coil off after sensor fault");
                }
            }
        }
    }

    async fn idle_until(&mut self, deadline: Instant) -> Wake {
        loop {
            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    // A dropped handle counts as a stop request.
                    if changed.is_err() || *self.stop.borrow_and_update() {
                        return Wake::Stop;
                    }
                }
                () = self.interlock.recheck_requested() => return Wake::Recheck,
                () = sleep_until(deadline) => return Wake::Deadline,
            }
        }
    }
}

/// Owner side of a running watchdog. Dropping it stops the watchdog at its
/// next wake-up.
#[derive(Debug)]
pub struct WatchdogHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<WatchdogReport>,
}

impl WatchdogHandle {
    /// Raises the cooperative stop flag without waiting.
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests a stop and waits for the task to exit.
    pub async fn stop(self) -> Result<WatchdogReport> {
        self.request_stop();
        self.task
            .await
            .map_err(|e| InterlockError::Watchdog(e.to_string()))
    }

    /// Aborts the task, even mid-transfer, and waits for it to be gone.
    /// Returns the report if the task had already finished on its own.
    pub async fn kill(self) -> Result<Option<WatchdogReport>> {
        self.task.abort();
        match self.task.await {
            Ok(report) => Ok(Some(report)),
            Err(e) if e.is_cancelled() => Ok(None),
            Err(e) => Err(InterlockError::Watchdog(e.to_string())),
        }
    }
}
