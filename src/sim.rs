//! Simulated coil and MAX6675 behind a [`DigitalIo`] interface.
//!
//! The sensor latches a conversion on the chip-select falling edge, presents
//! bit 15 on the data line and shifts one bit out on every clock falling edge.
//! The coil is a first-order thermal mass: it heats at a fixed rate while the
//! heat line is high and loses heat to ambient in proportion to the
//! difference.
//!
//! `SimulatedLines` is cheaply cloneable and every clone sees the same
//! hardware, so a test can keep a probe while the controller owns the
//! backend.

use crate::config::MAX_TICKS;
use crate::lines::{DigitalIo, Level, LineError, LineMap, LineMode};
use crate::sensor::TemperatureReading;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// 25 °C.
const AMBIENT_TICKS: f32 = 100.0;
/// 15 °C/s while energised.
const HEAT_RATE_TICKS_PER_S: f32 = 60.0;
/// Fraction of the excess over ambient lost per second.
const COOLING_PER_S: f32 = 0.01;

#[derive(Debug)]
struct CoilModel {
    temperature_ticks: f32,
    last_update: Instant,
}

impl CoilModel {
    fn new() -> Self {
        Self {
            temperature_ticks: AMBIENT_TICKS,
            last_update: Instant::now(),
        }
    }

    fn advance(&mut self, heating: bool) {
        let now = Instant::now();
        let dt_s = now.saturating_duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        let heat_in = if heating { HEAT_RATE_TICKS_PER_S } else { 0.0 };
        let heat_out = (self.temperature_ticks - AMBIENT_TICKS) * COOLING_PER_S;
        self.temperature_ticks =
            (self.temperature_ticks + (heat_in - heat_out) * dt_s).clamp(0.0, f32::from(MAX_TICKS));
    }

    fn ticks(&self) -> u16 {
        self.temperature_ticks.round() as u16
    }
}

#[derive(Debug)]
struct SimState {
    map: LineMap,
    reserved: HashMap<u32, LineMode>,
    levels: HashMap<u32, Level>,
    refused: HashSet<u32>,
    faulty: HashSet<u32>,
    rejected_levels: HashMap<u32, Level>,
    coil: CoilModel,
    held_ticks: Option<u16>,
    scripted_frames: VecDeque<u16>,
    frame: u16,
    bit: u32,
    conversions: u64,
    heat_on_edges: u32,
}

impl SimState {
    fn level(&self, pin: u32) -> Level {
        self.levels.get(&pin).copied().unwrap_or(Level::Low)
    }

    fn heat_high(&self) -> bool {
        self.level(self.map.heat).is_high()
    }

    fn selected(&self) -> bool {
        self.reserved.contains_key(&self.map.chip_select) && !self.level(self.map.chip_select).is_high()
    }

    fn latch_conversion(&mut self) {
        let heating = self.heat_high();
        self.coil.advance(heating);

        self.frame = match self.scripted_frames.pop_front() {
            Some(raw) => raw,
            None => {
                let ticks = self.held_ticks.unwrap_or_else(|| self.coil.ticks());
                (ticks & MAX_TICKS) << 3
            }
        };
        self.bit = 15;
        self.conversions += 1;
    }

    fn check_reserved(&self, pin: u32) -> Result<LineMode, LineError> {
        if self.faulty.contains(&pin) {
            return Err(LineError::Io(io::Error::other(format!("simulated fault on gpio {pin}"))));
        }
        self.reserved.get(&pin).copied().ok_or(LineError::NotReserved)
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedLines {
    inner: Arc<Mutex<SimState>>,
}

impl Default for SimulatedLines {
    fn default() -> Self {
        Self::with_map(LineMap::default())
    }
}

impl SimulatedLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map tells the simulation which pin plays which role.
    pub fn with_map(map: LineMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                map,
                reserved: HashMap::new(),
                levels: HashMap::new(),
                refused: HashSet::new(),
                faulty: HashSet::new(),
                rejected_levels: HashMap::new(),
                coil: CoilModel::new(),
                held_ticks: None,
                scripted_frames: VecDeque::new(),
                frame: 0,
                bit: 15,
                conversions: 0,
                heat_on_edges: 0,
            })),
        }
    }

    /// Every following conversion reports `ticks`, ignoring the coil model.
    pub fn hold_ticks(&self, ticks: u16) {
        self.state().held_ticks = Some(ticks);
    }

    /// Returns conversions to the coil model.
    pub fn follow_model(&self) {
        self.state().held_ticks = None;
    }

    /// Moves the modelled coil to `ticks`.
    pub fn set_coil_ticks(&self, ticks: u16) {
        let mut state = self.state();
        let heating = state.heat_high();
        state.coil.advance(heating);
        state.coil.temperature_ticks = f32::from(ticks.min(MAX_TICKS));
    }

    /// Queues a raw 16-bit word for the next conversion, ahead of any held
    /// or modelled value.
    pub fn push_frame(&self, raw: u16) {
        self.state().scripted_frames.push_back(raw);
    }

    /// Makes reservation of `pin` fail as if another driver owned it.
    pub fn refuse_reservation(&self, pin: u32) {
        self.state().refused.insert(pin);
    }

    /// Makes every operation on `pin` fail with an I/O error.
    pub fn inject_fault(&self, pin: u32) {
        self.state().faulty.insert(pin);
    }

    /// Makes writes of `level` to `pin` fail while other writes succeed.
    pub fn reject_level(&self, pin: u32, level: Level) {
        self.state().rejected_levels.insert(pin, level);
    }

    /// Clears both [`inject_fault`](Self::inject_fault) and
    /// [`reject_level`](Self::reject_level).
    pub fn clear_fault(&self, pin: u32) {
        let mut state = self.state();
        state.faulty.remove(&pin);
        state.rejected_levels.remove(&pin);
    }

    pub fn coil_temperature(&self) -> TemperatureReading {
        let mut state = self.state();
        let heating = state.heat_high();
        state.coil.advance(heating);
        TemperatureReading::from_ticks(state.coil.ticks())
    }

    pub fn level(&self, pin: u32) -> Level {
        self.state().level(pin)
    }

    pub fn heat_level(&self) -> Level {
        let state = self.state();
        state.level(state.map.heat)
    }

    pub fn is_reserved(&self, pin: u32) -> bool {
        self.state().reserved.contains_key(&pin)
    }

    pub fn reserved_count(&self) -> usize {
        self.state().reserved.len()
    }

    /// Number of chip-select falling edges seen.
    pub fn conversions(&self) -> u64 {
        self.state().conversions
    }

    /// Number of low-to-high transitions on the heat line.
    pub fn heat_on_edges(&self) -> u32 {
        self.state().heat_on_edges
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DigitalIo for SimulatedLines {
    fn reserve(&mut self, pin: u32, _label: &str, mode: LineMode) -> Result<(), LineError> {
        let mut state = self.state();
        if state.refused.contains(&pin) || state.reserved.contains_key(&pin) {
            return Err(LineError::Busy);
        }
        state.reserved.insert(pin, mode);
        if let LineMode::Output { initial } = mode {
            if pin == state.map.heat {
                let heating = state.heat_high();
                state.coil.advance(heating);
            }
            state.levels.insert(pin, initial);
        }
        Ok(())
    }

    fn release(&mut self, pin: u32) -> Result<(), LineError> {
        let mut state = self.state();
        state.reserved.remove(&pin).ok_or(LineError::NotReserved)?;
        if pin == state.map.heat {
            let heating = state.heat_high();
            state.coil.advance(heating);
        }
        // A released line keeps driving its last level.
        Ok(())
    }

    fn set(&mut self, pin: u32, level: Level) -> Result<(), LineError> {
        let mut state = self.state();
        if state.check_reserved(pin)? == LineMode::Input {
            return Err(LineError::NotOutput);
        }
        if state.rejected_levels.get(&pin) == Some(&level) {
            return Err(LineError::Io(io::Error::other(format!("simulated {level:?} write fault on gpio {pin}"))));
        }

        let previous = state.level(pin);
        let falling = previous.is_high() && !level.is_high();
        let map = state.map;

        if pin == map.heat {
            state.coil.advance(previous.is_high());
            if !previous.is_high() && level.is_high() {
                state.heat_on_edges += 1;
            }
        }

        state.levels.insert(pin, level);

        if pin == map.chip_select && falling {
            state.latch_conversion();
        } else if pin == map.clock && falling && state.selected() {
            state.bit = state.bit.saturating_sub(1);
        }
        Ok(())
    }

    fn get(&mut self, pin: u32) -> Result<Level, LineError> {
        let state = self.state();
        state.check_reserved(pin)?;
        if pin == state.map.data {
            // High impedance while deselected.
            if !state.selected() {
                return Ok(Level::Low);
            }
            return Ok(Level::from((state.frame >> state.bit) & 1 == 1));
        }
        Ok(state.level(pin))
    }
}
