//! Linux sysfs GPIO backend (`/sys/class/gpio`).

use crate::lines::{DigitalIo, Level, LineError, LineMode};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

// errno reported by the kernel when a pin is already exported elsewhere.
const EBUSY: i32 = 16;

const EXPORT_POLL_ATTEMPTS: u32 = 20;
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct SysfsLines {
    root: PathBuf,
    reserved: HashMap<u32, LineMode>,
}

impl Default for SysfsLines {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsLines {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            reserved: HashMap::new(),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn write_attr(&self, pin: u32, attr: &str, value: &str) -> io::Result<()> {
        fs::write(self.pin_dir(pin).join(attr), value)
    }

    /// The kernel creates `gpioN` asynchronously after an export.
    fn wait_for_export(&self, pin: u32) -> Result<(), LineError> {
        let dir = self.pin_dir(pin);
        for _ in 0..EXPORT_POLL_ATTEMPTS {
            if dir.exists() {
                return Ok(());
            }
            thread::sleep(EXPORT_POLL_INTERVAL);
        }
        Err(LineError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("gpio{pin} did not appear after export"),
        )))
    }

    fn mode(&self, pin: u32) -> Result<LineMode, LineError> {
        self.reserved.get(&pin).copied().ok_or(LineError::NotReserved)
    }
}

impl DigitalIo for SysfsLines {
    fn reserve(&mut self, pin: u32, label: &str, mode: LineMode) -> Result<(), LineError> {
        if self.reserved.contains_key(&pin) {
            return Err(LineError::Busy);
        }

        // An existing gpioN directory means another owner exported the pin.
        let already_exported = self.pin_dir(pin).exists();
        fs::write(self.root.join("export"), pin.to_string()).map_err(|e| {
            if e.raw_os_error() == Some(EBUSY) {
                LineError::Busy
            } else {
                LineError::Io(e)
            }
        })?;
        if already_exported {
            warn!(pin, label, "gpio already exported by another owner");
            return Err(LineError::Busy);
        }
        self.wait_for_export(pin)?;

        // "high"/"low" set direction and initial value in one write.
        let direction = match mode {
            LineMode::Output { initial: Level::High } => "high",
            LineMode::Output { initial: Level::Low } => "low",
            LineMode::Input => "in",
        };
        self.write_attr(pin, "direction", direction)?;

        debug!(pin, label, direction, "sysfs line exported");
        self.reserved.insert(pin, mode);
        Ok(())
    }

    fn release(&mut self, pin: u32) -> Result<(), LineError> {
        self.reserved.remove(&pin).ok_or(LineError::NotReserved)?;
        fs::write(self.root.join("unexport"), pin.to_string())?;
        Ok(())
    }

    fn set(&mut self, pin: u32, level: Level) -> Result<(), LineError> {
        if self.mode(pin)? == LineMode::Input {
            return Err(LineError::NotOutput);
        }
        let value = if level.is_high() { "1" } else { "0" };
        self.write_attr(pin, "value", value)?;
        Ok(())
    }

    fn get(&mut self, pin: u32) -> Result<Level, LineError> {
        self.mode(pin)?;
        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))?;
        Ok(Level::from(raw.trim() == "1"))
    }
}
