//! Interlock configuration.
//!
//! Everything tunable lives here: the two thermal limits, sampling cadence,
//! pin assignment, backend selection and the daemon listen address. A JSON
//! file may override any subset of the defaults.

use crate::error::{InterlockError, Result};
use crate::lines::LineMap;
use crate::sensor::TemperatureReading;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest value the 12-bit converter can report.
pub const MAX_TICKS: u16 = 0x0FFF;

/// 1000 °F.
pub const DEFAULT_SOFT_LIMIT_TICKS: u16 = 2151;
/// 1050 °F.
pub const DEFAULT_HARD_LIMIT_TICKS: u16 = 2662;

pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 1000;
/// Longest accepted sample period. The hard limit is only as fresh as the
/// last sample.
pub const MAX_SAMPLE_PERIOD_MS: u64 = 10_000;
pub const DEFAULT_HALF_BIT_MIN_MS: u64 = 10;
pub const DEFAULT_HALF_BIT_MAX_MS: u64 = 12;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";

const_assert!(DEFAULT_SOFT_LIMIT_TICKS < DEFAULT_HARD_LIMIT_TICKS);
const_assert!(DEFAULT_HARD_LIMIT_TICKS <= MAX_TICKS);
const_assert!(DEFAULT_HALF_BIT_MIN_MS <= DEFAULT_HALF_BIT_MAX_MS);
const_assert!(DEFAULT_SAMPLE_PERIOD_MS <= MAX_SAMPLE_PERIOD_MS);

/// Soft and hard ceilings, in Ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalLimits {
    /// Manual "on" requests are refused above this.
    pub soft_limit: u16,
    /// The watchdog forces the heater off above this.
    pub hard_limit: u16,
}

impl Default for ThermalLimits {
    fn default() -> Self {
        Self {
            soft_limit: DEFAULT_SOFT_LIMIT_TICKS,
            hard_limit: DEFAULT_HARD_LIMIT_TICKS,
        }
    }
}

impl ThermalLimits {
    pub fn above_soft(&self, reading: TemperatureReading) -> bool {
        reading.ticks() > self.soft_limit
    }

    pub fn above_hard(&self, reading: TemperatureReading) -> bool {
        reading.ticks() > self.hard_limit
    }

    pub fn validate(&self) -> Result<()> {
        if self.soft_limit >= self.hard_limit {
            return Err(InterlockError::Config(format!(
                "soft limit {} must be below hard limit {}",
                self.soft_limit, self.hard_limit
            )));
        }
        if self.hard_limit > MAX_TICKS {
            return Err(InterlockError::Config(format!(
                "hard limit {} exceeds sensor range {}",
                self.hard_limit, MAX_TICKS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingTiming {
    pub period_ms: u64,
    pub half_bit_min_ms: u64,
    pub half_bit_max_ms: u64,
}

impl Default for SamplingTiming {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            half_bit_min_ms: DEFAULT_HALF_BIT_MIN_MS,
            half_bit_max_ms: DEFAULT_HALF_BIT_MAX_MS,
        }
    }
}

impl SamplingTiming {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Hold time requested for each clock half-cycle.
    pub fn half_bit(&self) -> Duration {
        Duration::from_millis(self.half_bit_min_ms)
    }

    /// Upper bound of the half-cycle window, overshoot included.
    pub fn half_bit_max(&self) -> Duration {
        Duration::from_millis(self.half_bit_max_ms)
    }

    /// Worst-case duration of one 16-bit transfer.
    pub fn worst_case_sample(&self) -> Duration {
        self.half_bit_max() * 32
    }

    pub fn validate(&self) -> Result<()> {
        if self.period_ms == 0 {
            return Err(InterlockError::Config("sample period must be non-zero".into()));
        }
        if self.half_bit_min_ms == 0 || self.half_bit_min_ms > self.half_bit_max_ms {
            return Err(InterlockError::Config(format!(
                "half-bit window {}..{} ms is invalid",
                self.half_bit_min_ms, self.half_bit_max_ms
            )));
        }
        if self.period_ms > MAX_SAMPLE_PERIOD_MS {
            return Err(InterlockError::Config(format!(
                "sample period {} ms exceeds {} ms",
                self.period_ms, MAX_SAMPLE_PERIOD_MS
            )));
        }
        if self.worst_case_sample() >= self.period() {
            return Err(InterlockError::Config(format!(
                "a {} ms period cannot fit a {} ms transfer",
                self.period_ms,
                self.worst_case_sample().as_millis()
            )));
        }
        Ok(())
    }
}

/// Which [`DigitalIo`](crate::lines::DigitalIo) implementation to drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Simulated,
    Sysfs { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterlockConfig {
    pub limits: ThermalLimits,
    pub timing: SamplingTiming,
    pub pins: LineMap,
    pub backend: Backend,
    pub listen_addr: String,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            limits: ThermalLimits::default(),
            timing: SamplingTiming::default(),
            pins: LineMap::default(),
            backend: Backend::default(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl InterlockConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| InterlockError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| InterlockError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        self.timing.validate()?;
        if let Some((a, b)) = self.pins.find_conflict() {
            return Err(InterlockError::Config(format!(
                "{a} and {b} lines share gpio {}",
                self.pins.pin(a)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = InterlockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.soft_limit, 2151);
        assert_eq!(config.limits.hard_limit, 2662);
        assert_eq!(config.timing.period(), Duration::from_secs(1));
        assert_eq!(config.timing.half_bit(), Duration::from_millis(10));
        assert_eq!(config.pins.heat, 6);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = InterlockConfig::from_json_str(
            r#"{ "limits": { "soft_limit": 1000, "hard_limit": 1200 } }"#,
        )
        .unwrap();
        assert_eq!(config.limits.soft_limit, 1000);
        assert_eq!(config.limits.hard_limit, 1200);
        assert_eq!(config.timing, SamplingTiming::default());
        assert_eq!(config.backend, Backend::Simulated);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn test_sysfs_backend_parses() {
        let config = InterlockConfig::from_json_str(
            r#"{ "backend": { "kind": "sysfs", "root": "/sys/class/gpio" } }"#,
        )
        .unwrap();
        assert_eq!(
            config.backend,
            Backend::Sysfs { root: PathBuf::from("/sys/class/gpio") }
        );
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let result = InterlockConfig::from_json_str(
            r#"{ "limits": { "soft_limit": 2700, "hard_limit": 2662 } }"#,
        );
        assert!(matches!(result, Err(InterlockError::Config(_))));
    }

    #[test]
    fn test_hard_limit_beyond_sensor_range_rejected() {
        let limits = ThermalLimits { soft_limit: 100, hard_limit: 5000 };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_timing_must_fit_period() {
        let timing = SamplingTiming { period_ms: 300, half_bit_min_ms: 10, half_bit_max_ms: 12 };
        assert!(timing.validate().is_err());

        let timing = SamplingTiming { period_ms: 1000, half_bit_min_ms: 13, half_bit_max_ms: 12 };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_sample_period_is_bounded() {
        let timing = SamplingTiming { period_ms: MAX_SAMPLE_PERIOD_MS, ..SamplingTiming::default() };
        assert!(timing.validate().is_ok());

        for period_ms in [MAX_SAMPLE_PERIOD_MS + 1, 86_400_000, u64::MAX] {
            let timing = SamplingTiming { period_ms, ..SamplingTiming::default() };
            assert!(matches!(timing.validate(), Err(InterlockError::Config(_))), "{period_ms}");
        }
    }

    #[test]
    fn test_shared_pin_rejected() {
        let mut config = InterlockConfig::default();
        config.pins.clock = config.pins.data;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limit_comparisons_are_strict() {
        let limits = ThermalLimits::default();
        assert!(!limits.above_soft(TemperatureReading::from_ticks(2151)));
        assert!(limits.above_soft(TemperatureReading::from_ticks(2152)));
        assert!(!limits.above_hard(TemperatureReading::from_ticks(2662)));
        assert!(limits.above_hard(TemperatureReading::from_ticks(2663)));
    }
}
