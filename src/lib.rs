//! # Heating Coil Interlock
//!
//! Drives a resistive heating coil through a single GPIO line while a
//! watchdog samples a MAX6675 thermocouple converter over three bit-banged
//! lines and cuts the coil past a hard thermal limit, whatever the
//! controlling client is doing.
//!
//! ## Features
//!
//! - **Bit-banged sensor link**: 16-bit MSB-first transfer, 12-bit reading in
//!   quarter-degree Ticks
//! - **Independent watchdog**: 1 Hz sampling task with prompt cooperative stop
//! - **Two-threshold interlock**: soft limit gates "on" requests, hard limit
//!   forces the coil off
//! - **Fail-safe release**: closing the status channel turns the coil off
//! - **Pluggable lines**: simulated hardware or Linux sysfs GPIO
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heatcoil::{Channel, CoilController, InterlockConfig, SimulatedLines};
//!
//! # async fn run() -> Result<(), heatcoil::InterlockError> {
//! let controller = CoilController::start(InterlockConfig::default(), SimulatedLines::new())?;
//! let surface = controller.surface();
//!
//! let status = surface.open(Channel::Status);
//! status.write(b"1")?;
//! println!("heater: {}", status.read().as_str());
//!
//! // Releasing the status channel always turns the coil off.
//! status.release()?;
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`lines`] - Digital line abstraction and role mapping
//! - [`sensor`] - MAX6675 sampling protocol
//! - [`watchdog`] - Periodic sampling and hard-limit enforcement
//! - [`interlock`] - Heater state machine and shared thermal state
//! - [`surface`] - Channel read/write/release dispatch
//! - [`controller`] - Start-up and orderly shutdown
//! - [`protocol`] - Line protocol used by the daemon and CLI
//! - [`sim`], [`sysfs`] - Line backends

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod controller;
pub mod error;
pub mod interlock;
pub mod lines;
pub mod protocol;
pub mod sensor;
pub mod sim;
pub mod surface;
pub mod sysfs;
pub mod watchdog;

pub use config::{InterlockConfig, ThermalLimits};
pub use controller::CoilController;
pub use error::InterlockError;
pub use interlock::{CoilInterlock, HeaterState};
pub use sensor::TemperatureReading;
pub use sim::SimulatedLines;
pub use surface::{Channel, ControlSurface};
