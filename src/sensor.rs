//! MAX6675 thermocouple link over three bit-banged lines.
//!
//! A transfer is 16 clocked bits, MSB first. Bits 14..3 carry the
//! temperature in quarter degrees, bit 2 is the open-input flag.
//!
//! The open-input flag is not acted on here: a disconnected thermocouple
//! reads as whatever the converter reports. [`SensorFrame::open_input`]
//! exposes the bit for diagnostics.

use crate::config::{SamplingTiming, MAX_TICKS};
use crate::error::Result;
use crate::lines::{Level, LineRole, Lines};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const FRAME_BITS: u32 = 16;

const TEMPERATURE_SHIFT: u32 = 3;
const OPEN_INPUT_MASK: u16 = 0x0004;

/// Temperature in Ticks (0.25 °C), always within `0..=4095`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemperatureReading(u16);

impl TemperatureReading {
    /// Values above the 12-bit range are masked, as the converter would.
    pub const fn from_ticks(ticks: u16) -> Self {
        Self(ticks & MAX_TICKS)
    }

    pub const fn ticks(self) -> u16 {
        self.0
    }

    pub fn celsius(self) -> f32 {
        f32::from(self.0) * 0.25
    }

    pub fn fahrenheit(self) -> f32 {
        self.celsius() * 9.0 / 5.0 + 32.0
    }
}

impl fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw 16-bit word as clocked out of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame(u16);

impl SensorFrame {
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn reading(self) -> TemperatureReading {
        TemperatureReading::from_ticks(self.0 >> TEMPERATURE_SHIFT)
    }

    /// Thermocouple input open (D2). Reported, never enforced.
    pub const fn open_input(self) -> bool {
        self.0 & OPEN_INPUT_MASK != 0
    }
}

/// Owns the sampling sequence on the chip-select, clock and data lines.
///
/// Transfers must never overlap. `sample` takes `&mut self` and the
/// watchdog holds the only instance, so concurrent callers cannot exist.
#[derive(Debug)]
pub struct SensorLink {
    lines: Lines,
    timing: SamplingTiming,
}

impl SensorLink {
    pub fn new(lines: Lines, timing: SamplingTiming) -> Self {
        Self { lines, timing }
    }

    pub fn timing(&self) -> SamplingTiming {
        self.timing
    }

    pub async fn sample(&mut self) -> Result<TemperatureReading> {
        let frame = self.read_frame().await?;
        if frame.open_input() {
            debug!(raw = frame.raw(), "open-input bit set");
        }
        Ok(frame.reading())
    }

    /// Runs one full transfer and returns the raw word.
    pub async fn read_frame(&mut self) -> Result<SensorFrame> {
        self.lines.set(LineRole::ChipSelect, Level::Low)?;

        let clocked = self.clock_in().await;
        if clocked.is_err() {
            if let Err(e) = self.lines.set(LineRole::Clock, Level::Low) {
                warn!(error = %e, "could not park clock line");
            }
        }

        // Deselect even when a bit failed.
        let deselect = self.lines.set(LineRole::ChipSelect, Level::High);
        let word = clocked?;
        deselect?;

        Ok(SensorFrame(word))
    }

    async fn clock_in(&self) -> Result<u16> {
        let hold = self.timing.half_bit();
        let mut word: u16 = 0;

        for _ in 0..FRAME_BITS {
            self.lines.set(LineRole::Clock, Level::High)?;
            sleep(hold).await;

            word <<= 1;
            if self.lines.get(LineRole::Data)?.is_high() {
                word |= 1;
            }

            self.lines.set(LineRole::Clock, Level::Low)?;
            sleep(hold).await;
        }

        Ok(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_drops_status_bits() {
        // 2000 ticks, open-input and id bits set.
        let frame = SensorFrame::from_raw((2000 << 3) | 0b111);
        assert_eq!(frame.reading().ticks(), 2000);
        assert!(frame.open_input());
    }

    #[test]
    fn test_frame_masks_sign_bit() {
        let frame = SensorFrame::from_raw(0xFFFF);
        assert_eq!(frame.reading().ticks(), 4095);
    }

    #[test]
    fn test_unit_conversions() {
        let reading = TemperatureReading::from_ticks(2000);
        assert!((reading.celsius() - 500.0).abs() < f32::EPSILON);
        assert!((reading.fahrenheit() - 932.0).abs() < 0.01);
    }

    #[test]
    fn test_from_ticks_masks_to_twelve_bits() {
        assert_eq!(TemperatureReading::from_ticks(0x1FFF).ticks(), 0x0FFF);
        assert_eq!(TemperatureReading::from_ticks(4095).to_string(), "4095");
    }
}
