//! Coil interlock state machine.
//!
//! Holds the shared thermal state (latest reading, heater state and
//! diagnostics) behind one guard. The heat line is only ever written while
//! that guard is held, so the reported state and the line agree.
//!
//! Two independent ceilings apply. The soft limit gates manual "on"
//! requests. The hard limit is enforced by the watchdog through
//! [`CoilInterlock::publish_sample`] and cannot be overridden.

use crate::config::ThermalLimits;
use crate::error::Result;
use crate::lines::{Level, LineRole, Lines};
use crate::sensor::TemperatureReading;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const MAX_INTERLOCK_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaterState {
    #[default]
    Off,
    On,
}

impl HeaterState {
    pub fn is_on(self) -> bool {
        matches!(self, HeaterState::On)
    }

    /// `'0'` or `'1'`, as read back from the status channel.
    pub fn as_digit(self) -> char {
        match self {
            HeaterState::Off => '0',
            HeaterState::On => '1',
        }
    }
}

/// Why the heater was driven off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffReason {
    Requested,
    ThermalLimit,
    ClientReleased,
    SensorIo,
    /// The heat line rejected an on write.
    HeatLineFault,
    Shutdown,
}

/// Result of an on/off request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    Applied(HeaterState),
    Refused {
        reading: TemperatureReading,
        soft_limit: u16,
    },
}

impl Transition {
    pub fn is_refused(&self) -> bool {
        matches!(self, Transition::Refused { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterlockEventKind {
    TurnedOn,
    TurnedOff(OffReason),
    OnRefused,
    ThermalLimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockEvent {
    pub sequence: u32,
    pub kind: InterlockEventKind,
    pub reading: TemperatureReading,
    pub heater: HeaterState,
}

/// Point-in-time copy of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalSnapshot {
    pub reading: TemperatureReading,
    pub heater: HeaterState,
    pub limits: ThermalLimits,
    pub samples: u64,
    pub breaches: u32,
    pub refusals: u32,
}

#[derive(Debug, Default)]
struct ThermalState {
    reading: TemperatureReading,
    heater: HeaterState,
    samples: u64,
    breaches: u32,
    refusals: u32,
    events: Vec<InterlockEvent, MAX_INTERLOCK_EVENTS>,
    next_sequence: u32,
}

impl ThermalState {
    fn record(&mut self, kind: InterlockEventKind) {
        let event = InterlockEvent {
            sequence: self.next_sequence,
            kind,
            reading: self.reading,
            heater: self.heater,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if self.events.is_full() {
            self.events.remove(0);
        }
        let _ = self.events.push(event);
    }
}

#[derive(Debug)]
pub struct CoilInterlock {
    state: Mutex<ThermalState>,
    lines: Lines,
    limits: ThermalLimits,
    recheck: Notify,
}

impl CoilInterlock {
    /// Starts Off with a zero reading. The heat line is assumed to be idle
    /// low already, as left by [`Lines::acquire`].
    pub fn new(lines: Lines, limits: ThermalLimits) -> Self {
        Self {
            state: Mutex::new(ThermalState::default()),
            lines,
            limits,
            recheck: Notify::new(),
        }
    }

    pub fn limits(&self) -> ThermalLimits {
        self.limits
    }

    pub fn heater(&self) -> HeaterState {
        self.state().heater
    }

    pub fn reading(&self) -> TemperatureReading {
        self.state().reading
    }

    pub fn snapshot(&self) -> ThermalSnapshot {
        let state = self.state();
        ThermalSnapshot {
            reading: state.reading,
            heater: state.heater,
            limits: self.limits,
            samples: state.samples,
            breaches: state.breaches,
            refusals: state.refusals,
        }
    }

    /// Oldest first.
    pub fn recent_events(&self) -> std::vec::Vec<InterlockEvent> {
        self.state().events.iter().copied().collect()
    }

    /// Turns the coil on unless the latest reading is above the soft limit.
    ///
    /// A successful transition also asks the watchdog for an immediate
    /// resample, so the hard limit is re-checked against a fresh reading.
    pub fn request_on(&self) -> Result<Transition> {
        let mut state = self.state();

        if self.limits.above_soft(state.reading) {
            state.refusals = state.refusals.saturating_add(1);
            state.record(InterlockEventKind::OnRefused);
            info!(
                ticks = state.reading.ticks(),
                soft_limit = self.limits.soft_limit,
                "heating coil on request refused"
            );
            return Ok(Transition::Refused {
                reading: state.reading,
                soft_limit: self.limits.soft_limit,
            });
        }

        if let Err(e) = self.lines.set(LineRole::Heat, Level::High) {
            error!(error = %e, "failed to drive heat line high");
            // A failure here is already logged by turn_off_locked.
            let _ = self.turn_off_locked(&mut state, OffReason::HeatLineFault);
            return Err(e);
        }

        let was_on = state.heater.is_on();
        state.heater = HeaterState::On;
        if !was_on {
            state.record(InterlockEventKind::TurnedOn);
            info!(ticks = state.reading.ticks(), "heating coil was turned on");
        }
        drop(state);

        self.recheck.notify_one();
        Ok(Transition::Applied(HeaterState::On))
    }

    /// Unconditional off. Idempotent; the line is re-asserted every time.
    pub fn request_off(&self) -> Result<Transition> {
        self.force_off(OffReason::Requested)?;
        Ok(Transition::Applied(HeaterState::Off))
    }

    /// Off regardless of who turned the coil on.
    pub fn force_off(&self, reason: OffReason) -> Result<()> {
        let mut state = self.state();
        self.turn_off_locked(&mut state, reason)
    }

    /// Publishes a new reading and trips the coil if it is above the hard
    /// limit while on. The check and the trip happen under the same guard
    /// as the publish. Returns `true` when the coil was tripped.
    pub fn publish_sample(&self, reading: TemperatureReading) -> Result<bool> {
        let mut state = self.state();
        state.reading = reading;
        state.samples = state.samples.saturating_add(1);

        if !(self.limits.above_hard(reading) && state.heater.is_on()) {
            return Ok(false);
        }

        state.breaches = state.breaches.saturating_add(1);
        state.record(InterlockEventKind::ThermalLimitExceeded);
        warn!(
            ticks = reading.ticks(),
            hard_limit = self.limits.hard_limit,
            "THERMAL LIMIT EXCEEDED, TURNING OFF HEATING COIL"
        );
        self.turn_off_locked(&mut state, OffReason::ThermalLimit)?;
        Ok(true)
    }

    pub(crate) fn recheck_requested(&self) -> Notified<'_> {
        self.recheck.notified()
    }

    fn turn_off_locked(&self, state: &mut ThermalState, reason: OffReason) -> Result<()> {
        if let Err(e) = self.lines.set(LineRole::Heat, Level::Low) {
            error!(?reason, error = %e, "failed to drive heat line low");
            return Err(e);
        }

        if state.heater.is_on() {
            state.heater = HeaterState::Off;
            state.record(InterlockEventKind::TurnedOff(reason));
            info!(?reason, ticks = state.reading.ticks(), "heating coil was turned off");
        } else {
            debug!(?reason, "heating coil already off");
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, ThermalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
