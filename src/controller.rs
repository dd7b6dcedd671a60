use crate::config::InterlockConfig;
use crate::error::Result;
use crate::interlock::{CoilInterlock, OffReason, ThermalSnapshot};
use crate::lines::{DigitalIo, Level, LineRole, Lines};
use crate::sensor::SensorLink;
use crate::surface::ControlSurface;
use crate::watchdog::{ThermalWatchdog, WatchdogHandle, WatchdogReport};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lifecycle owner for one coil: lines, interlock and watchdog.
///
/// Dropping a controller without [`shutdown`](Self::shutdown) still forces
/// the heater off; the lines are then released when the last user goes away.
pub struct CoilController {
    config: InterlockConfig,
    lines: Lines,
    interlock: Arc<CoilInterlock>,
    watchdog: Option<WatchdogHandle>,
    released: bool,
}

impl CoilController {
    /// Reserves the lines and starts the watchdog. Any line that cannot be
    /// reserved aborts start-up.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<D: DigitalIo + 'static>(config: InterlockConfig, io: D) -> Result<Self> {
        config.validate()?;

        let lines = Lines::acquire(io, config.pins)?;
        let interlock = Arc::new(CoilInterlock::new(lines.clone(), config.limits));
        let sensor = SensorLink::new(lines.clone(), config.timing);
        let watchdog = ThermalWatchdog::spawn(sensor, Arc::clone(&interlock), config.timing.period());

        info!(
            soft_limit = config.limits.soft_limit,
            hard_limit = config.limits.hard_limit,
            "heater coil controller has been loaded"
        );

        Ok(Self {
            config,
            lines,
            interlock,
            watchdog: Some(watchdog),
            released: false,
        })
    }

    pub fn config(&self) -> &InterlockConfig {
        &self.config
    }

    pub fn interlock(&self) -> Arc<CoilInterlock> {
        Arc::clone(&self.interlock)
    }

    pub fn surface(&self) -> ControlSurface {
        ControlSurface::new(Arc::clone(&self.interlock))
    }

    pub fn snapshot(&self) -> ThermalSnapshot {
        self.interlock.snapshot()
    }

    pub fn watchdog_running(&self) -> bool {
        self.watchdog.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stops and joins the watchdog, forces the heater off, then releases
    /// the lines. Every step runs even if an earlier one failed; the first
    /// error is returned.
    pub async fn shutdown(mut self) -> Result<WatchdogReport> {
        let stopped = match self.watchdog.take() {
            Some(watchdog) => watchdog.stop().await,
            None => Ok(WatchdogReport::default()),
        };
        if let Err(e) = &stopped {
            error!(error = %e, "watchdog did not stop cleanly");
        }

        let teardown = self.teardown();
        let report = stopped?;
        teardown?;
        Ok(report)
    }

    /// Aborts the watchdog instead of waiting for its next wake-up, then
    /// tears down like [`shutdown`](Self::shutdown).
    pub async fn kill(mut self) -> Result<()> {
        let killed = match self.watchdog.take() {
            Some(watchdog) => watchdog.kill().await.map(|_| ()),
            None => Ok(()),
        };

        // An aborted transfer may have left the clock high and the sensor
        // selected.
        if let Err(e) = self.lines.set(LineRole::Clock, Level::Low) {
            warn!(error = %e, "could not park clock line");
        }
        if let Err(e) = self.lines.set(LineRole::ChipSelect, Level::High) {
            warn!(error = %e, "could not deselect sensor");
        }

        let teardown = self.teardown();
        killed?;
        teardown
    }

    fn teardown(&mut self) -> Result<()> {
        let off = self.interlock.force_off(OffReason::Shutdown);
        let released = self.lines.release_all();
        self.released = true;
        info!("heater coil controller has been unloaded");
        off?;
        released
    }
}

impl Drop for CoilController {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.request_stop();
        }
        warn!("controller dropped without shutdown; forcing heating coil off");
        if let Err(e) = self.interlock.force_off(OffReason::Shutdown) {
            error!(error = %e, "failed to turn heating coil off on drop");
        }
    }
}
