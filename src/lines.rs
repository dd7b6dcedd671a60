//! Digital line abstraction.
//!
//! The interlock never touches pins directly. It drives four logical lines
//! through [`Lines`], which binds each [`LineRole`] to a pin identifier on one
//! shared [`DigitalIo`] backend.

use crate::error::{InterlockError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineRole {
    ChipSelect,
    Clock,
    Data,
    Heat,
}

impl LineRole {
    /// Acquisition order. Heat comes first so the coil is pinned low before
    /// anything else happens.
    pub const ACQUIRE_ORDER: [LineRole; 4] = [
        LineRole::Heat,
        LineRole::ChipSelect,
        LineRole::Clock,
        LineRole::Data,
    ];

    /// Direction and idle level for each role.
    pub fn mode(self) -> LineMode {
        match self {
            LineRole::ChipSelect => LineMode::Output { initial: Level::High },
            LineRole::Clock => LineMode::Output { initial: Level::Low },
            LineRole::Heat => LineMode::Output { initial: Level::Low },
            LineRole::Data => LineMode::Input,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LineRole::ChipSelect => "CS",
            LineRole::Clock => "CLK",
            LineRole::Data => "DATA",
            LineRole::Heat => "HEAT",
        }
    }
}

impl fmt::Display for LineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineRole::ChipSelect => "chip-select",
            LineRole::Clock => "clock",
            LineRole::Data => "data",
            LineRole::Heat => "heat",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    Output { initial: Level },
    Input,
}

/// Backend-level line failure.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("line already reserved")]
    Busy,
    #[error("line not reserved")]
    NotReserved,
    #[error("line is configured as input")]
    NotOutput,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pin-level capability supplied by the platform.
///
/// Implementations must make `reserve` exclusive: a second reservation of the
/// same pin fails with [`LineError::Busy`] until it is released.
pub trait DigitalIo: Send {
    fn reserve(&mut self, pin: u32, label: &str, mode: LineMode) -> core::result::Result<(), LineError>;
    fn release(&mut self, pin: u32) -> core::result::Result<(), LineError>;
    fn set(&mut self, pin: u32, level: Level) -> core::result::Result<(), LineError>;
    fn get(&mut self, pin: u32) -> core::result::Result<Level, LineError>;
}

/// Pin assignment for each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMap {
    pub chip_select: u32,
    pub clock: u32,
    pub data: u32,
    pub heat: u32,
}

impl Default for LineMap {
    fn default() -> Self {
        Self {
            chip_select: 24,
            clock: 23,
            data: 22,
            heat: 6,
        }
    }
}

impl LineMap {
    pub fn pin(&self, role: LineRole) -> u32 {
        match role {
            LineRole::ChipSelect => self.chip_select,
            LineRole::Clock => self.clock,
            LineRole::Data => self.data,
            LineRole::Heat => self.heat,
        }
    }

    /// Returns the first pair of roles sharing a pin, if any.
    pub fn find_conflict(&self) -> Option<(LineRole, LineRole)> {
        let roles = LineRole::ACQUIRE_ORDER;
        for (i, a) in roles.iter().enumerate() {
            for b in &roles[i + 1..] {
                if self.pin(*a) == self.pin(*b) {
                    return Some((*a, *b));
                }
            }
        }
        None
    }
}

/// The four reserved lines over a shared backend.
///
/// Cloning is cheap; every clone drives the same backend. The backend guard
/// is held for a single line operation only. When the last clone goes away
/// any line still reserved is released.
#[derive(Clone)]
pub struct Lines {
    bank: Arc<Mutex<Bank>>,
    map: LineMap,
}

struct Bank {
    io: Box<dyn DigitalIo>,
    map: LineMap,
    held: bool,
}

impl Bank {
    fn release_roles(&mut self) -> Result<()> {
        self.held = false;
        let mut first_error = None;
        for role in LineRole::ACQUIRE_ORDER.iter().rev() {
            let pin = self.map.pin(*role);
            if let Err(source) = self.io.release(pin) {
                error!(%role, pin, %source, "line release failed");
                if first_error.is_none() {
                    first_error = Some(InterlockError::LineIo { role: *role, pin, source });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Bank {
    fn drop(&mut self) {
        if self.held {
            warn!("lines dropped while still reserved");
            let _ = self.release_roles();
        }
    }
}

impl fmt::Debug for Lines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lines").field("map", &self.map).finish_non_exhaustive()
    }
}

impl Lines {
    /// Reserves every role with its idle level. On failure, lines reserved so
    /// far are released again and the error is returned.
    pub fn acquire<D: DigitalIo + 'static>(io: D, map: LineMap) -> Result<Self> {
        let mut io: Box<dyn DigitalIo> = Box::new(io);
        info!("starting GPIO setup ...");

        let mut reserved: heapless::Vec<LineRole, 4> = heapless::Vec::new();
        for role in LineRole::ACQUIRE_ORDER {
            let pin = map.pin(role);
            if let Err(source) = io.reserve(pin, role.label(), role.mode()) {
                error!(%role, pin, %source, "line reservation failed");
                for done in reserved.iter().rev() {
                    if let Err(e) = io.release(map.pin(*done)) {
                        error!(role = %done, error = %e, "rollback release failed");
                    }
                }
                return Err(InterlockError::LineUnavailable { role, pin, source });
            }
            debug!(%role, pin, "line reserved");
            let _ = reserved.push(role);
        }

        info!("... finished setting up GPIO");
        Ok(Self {
            bank: Arc::new(Mutex::new(Bank { io, map, held: true })),
            map,
        })
    }

    pub fn map(&self) -> LineMap {
        self.map
    }

    pub fn set(&self, role: LineRole, level: Level) -> Result<()> {
        let pin = self.map.pin(role);
        self.bank()
            .io
            .set(pin, level)
            .map_err(|source| InterlockError::LineIo { role, pin, source })
    }

    pub fn get(&self, role: LineRole) -> Result<Level> {
        let pin = self.map.pin(role);
        self.bank()
            .io
            .get(pin)
            .map_err(|source| InterlockError::LineIo { role, pin, source })
    }

    /// Releases every role. All roles are attempted; the first failure is
    /// returned. A second call is a no-op.
    pub fn release_all(&self) -> Result<()> {
        let mut bank = self.bank();
        if !bank.held {
            return Ok(());
        }
        info!("freeing GPIO ...");
        let released = bank.release_roles();
        drop(bank);
        info!("... GPIO freed");
        released
    }

    // Poisoning is ignored: the heat line must stay drivable after a panic.
    fn bank(&self) -> MutexGuard<'_, Bank> {
        self.bank.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
