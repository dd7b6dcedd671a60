//! Device-like front end: two channels with open/read/write/release.
//!
//! | Channel     | read          | write                   | release   |
//! |-------------|---------------|-------------------------|-----------|
//! | temperature | `"<ticks>\n"` | ignored                 | nothing   |
//! | status      | `"0\n"`/`"1\n"` | `'1'` on, else off    | force off |
//!
//! Transport is someone else's problem; this module owns only the dispatch.

use crate::error::{InterlockError, Result};
use crate::interlock::{CoilInterlock, OffReason, Transition};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Enough for `"4095\n"`.
pub const READ_BUFFER_SIZE: usize = 8;

pub type ReadBuffer = ArrayString<READ_BUFFER_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Temperature,
    Status,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Temperature, Channel::Status];

    pub fn from_selector(selector: u32) -> Result<Self> {
        match selector {
            0 => Ok(Channel::Temperature),
            1 => Ok(Channel::Status),
            other => Err(InterlockError::InvalidChannel(other)),
        }
    }

    pub fn selector(self) -> u32 {
        match self {
            Channel::Temperature => 0,
            Channel::Status => 1,
        }
    }

    pub fn device_name(self) -> &'static str {
        match self {
            Channel::Temperature => "heatcoil.temp",
            Channel::Status => "heatcoil.status",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_name())
    }
}

impl FromStr for Channel {
    type Err = InterlockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "temp" | "temperature" | "heatcoil.temp" => Ok(Channel::Temperature),
            "status" | "heatcoil.status" => Ok(Channel::Status),
            other => other
                .parse::<u32>()
                .map_err(|_| InterlockError::UnknownChannel(other.to_string()))
                .and_then(Channel::from_selector),
        }
    }
}

/// Outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    pub bytes: usize,
    /// `None` for channels that ignore writes.
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone)]
pub struct ControlSurface {
    interlock: Arc<CoilInterlock>,
}

impl ControlSurface {
    pub fn new(interlock: Arc<CoilInterlock>) -> Self {
        Self { interlock }
    }

    /// No exclusivity is enforced; any number of handles may be open.
    pub fn open(&self, channel: Channel) -> ChannelHandle {
        debug!(%channel, "channel opened");
        ChannelHandle {
            surface: self.clone(),
            channel,
            released: false,
        }
    }

    pub fn open_selector(&self, selector: u32) -> Result<ChannelHandle> {
        Ok(self.open(Channel::from_selector(selector)?))
    }

    pub fn read(&self, channel: Channel) -> ReadBuffer {
        let mut out = ReadBuffer::new();
        // Capacity covers the widest value of either channel.
        let _ = match channel {
            Channel::Temperature => writeln!(out, "{}", self.interlock.reading()),
            Channel::Status => writeln!(out, "{}", self.interlock.heater().as_digit()),
        };
        out
    }

    /// Copies the channel's read string into a caller buffer. A buffer too
    /// small for the whole string is a transfer fault and nothing is copied.
    pub fn read_into(&self, channel: Channel, buf: &mut [u8]) -> Result<usize> {
        let text = self.read(channel);
        let bytes = text.as_bytes();
        let available = buf.len();
        let dest = buf.get_mut(..bytes.len()).ok_or(InterlockError::Transfer {
            needed: bytes.len(),
            available,
        })?;
        dest.copy_from_slice(bytes);
        Ok(bytes.len())
    }

    pub fn write(&self, channel: Channel, data: &[u8]) -> Result<Written> {
        let transition = match channel {
            Channel::Temperature => None,
            Channel::Status => Some(match data.first() {
                Some(b'1') => self.interlock.request_on()?,
                _ => self.interlock.request_off()?,
            }),
        };
        Ok(Written {
            bytes: data.len(),
            transition,
        })
    }

    pub fn release(&self, channel: Channel) -> Result<()> {
        debug!(%channel, "channel released");
        match channel {
            Channel::Temperature => Ok(()),
            // Nobody is supervising any more.
            Channel::Status => self.interlock.force_off(OffReason::ClientReleased),
        }
    }

    pub fn read_selector(&self, selector: u32, buf: &mut [u8]) -> Result<usize> {
        self.read_into(Channel::from_selector(selector)?, buf)
    }

    pub fn write_selector(&self, selector: u32, data: &[u8]) -> Result<Written> {
        self.write(Channel::from_selector(selector)?, data)
    }

    pub fn release_selector(&self, selector: u32) -> Result<()> {
        self.release(Channel::from_selector(selector)?)
    }
}

/// An open channel. Dropping an unreleased handle releases it.
#[derive(Debug)]
pub struct ChannelHandle {
    surface: ControlSurface,
    channel: Channel,
    released: bool,
}

impl ChannelHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn read(&self) -> ReadBuffer {
        self.surface.read(self.channel)
    }

    pub fn read_into(&self, buf: &mut [u8]) -> Result<usize> {
        self.surface.read_into(self.channel, buf)
    }

    pub fn write(&self, data: &[u8]) -> Result<Written> {
        self.surface.write(self.channel, data)
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.surface.release(self.channel)
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.surface.release(self.channel) {
            error!(channel = %self.channel, error = %e, "release on drop failed");
        }
    }
}
