//! Line protocol spoken by `heatcoild` and `heatcoil`.
//!
//! A session opens exactly one channel, named on the first line. Each later
//! line is one request and gets one reply line:
//!
//! ```text
//! -> status                 <- open heatcoil.status
//! -> write 1                <- ok 1            | refused <ticks> <soft_limit>
//! -> read                   <- data 1
//! ```
//!
//! Closing the connection releases the channel.

use crate::interlock::Transition;
use crate::surface::{Channel, ChannelHandle};
use thiserror::Error;

pub const MAX_REQUEST_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Read,
    Write(&'a str),
}

impl<'a> Request<'a> {
    /// `Ok(None)` for blank lines.
    pub fn parse(line: &'a str) -> Result<Option<Self>, ProtocolError> {
        if line.len() > MAX_REQUEST_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let (verb, payload) = match line.split_once(' ') {
            Some((verb, payload)) => (verb, payload),
            None => (line, ""),
        };
        match verb {
            "read" if payload.is_empty() => Ok(Some(Request::Read)),
            "write" => Ok(Some(Request::Write(payload))),
            _ => Err(ProtocolError::UnknownRequest(line.to_string())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Request::Read => "read\n".to_string(),
            Request::Write(payload) => format!("write {payload}\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Opened(Channel),
    /// The channel's read string, newline stripped.
    Data(String),
    Written(usize),
    Refused { ticks: u16, soft_limit: u16 },
    Fault(String),
}

impl Reply {
    pub fn encode(&self) -> String {
        match self {
            Reply::Opened(channel) => format!("open {}\n", channel.device_name()),
            Reply::Data(data) => format!("data {data}\n"),
            Reply::Written(bytes) => format!("ok {bytes}\n"),
            Reply::Refused { ticks, soft_limit } => format!("refused {ticks} {soft_limit}\n"),
            Reply::Fault(message) => format!("fault {message}\n"),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let malformed = || ProtocolError::MalformedReply(line.to_string());
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

        match verb {
            "open" => rest.parse::<Channel>().map(Reply::Opened).map_err(|_| malformed()),
            "data" => Ok(Reply::Data(rest.to_string())),
            "ok" => rest.parse().map(Reply::Written).map_err(|_| malformed()),
            "refused" => {
                let (ticks, soft_limit) = rest.split_once(' ').ok_or_else(malformed)?;
                Ok(Reply::Refused {
                    ticks: ticks.parse().map_err(|_| malformed())?,
                    soft_limit: soft_limit.parse().map_err(|_| malformed())?,
                })
            }
            "fault" => Ok(Reply::Fault(rest.to_string())),
            _ => Err(malformed()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request exceeds {} bytes", MAX_REQUEST_SIZE)]
    MessageTooLarge,
    #[error("unknown request {0:?}")]
    UnknownRequest(String),
    #[error("malformed reply {0:?}")]
    MalformedReply(String),
}

/// Runs one request against an open channel.
pub fn execute(handle: &ChannelHandle, request: Request<'_>) -> Reply {
    match request {
        Request::Read => Reply::Data(handle.read().trim_end().to_string()),
        Request::Write(payload) => match handle.write(payload.as_bytes()) {
            Ok(written) => match written.transition {
                Some(Transition::Refused { reading, soft_limit }) => Reply::Refused {
                    ticks: reading.ticks(),
                    soft_limit,
                },
                _ => Reply::Written(written.bytes),
            },
            Err(e) => Reply::Fault(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThermalLimits;
    use crate::interlock::CoilInterlock;
    use crate::lines::{LineMap, Lines};
    use crate::sensor::TemperatureReading;
    use crate::sim::SimulatedLines;
    use crate::surface::ControlSurface;
    use std::sync::Arc;

    fn surface() -> (ControlSurface, Arc<CoilInterlock>) {
        let lines = Lines::acquire(SimulatedLines::new(), LineMap::default()).unwrap();
        let interlock = Arc::new(CoilInterlock::new(lines, ThermalLimits::default()));
        (ControlSurface::new(Arc::clone(&interlock)), interlock)
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse("read\n").unwrap(), Some(Request::Read));
        assert_eq!(Request::parse("write 1").unwrap(), Some(Request::Write("1")));
        assert_eq!(Request::parse("write").unwrap(), Some(Request::Write("")));
        assert_eq!(Request::parse("   \r\n").unwrap(), None);
    }

    #[test]
    fn test_reject_unknown_and_oversized_requests() {
        assert!(matches!(Request::parse("toggle"), Err(ProtocolError::UnknownRequest(_))));
        assert!(matches!(Request::parse("read now"), Err(ProtocolError::UnknownRequest(_))));
        let huge = "write ".to_string() + &"1".repeat(MAX_REQUEST_SIZE);
        assert_eq!(Request::parse(&huge), Err(ProtocolError::MessageTooLarge));
    }

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(Reply::Opened(Channel::Status).encode(), "open heatcoil.status\n");
        assert_eq!(Reply::Data("2000".into()).encode(), "data 2000\n");
        assert_eq!(Reply::Refused { ticks: 2200, soft_limit: 2151 }.encode(), "refused 2200 2151\n");
    }

    #[test]
    fn test_parse_replies() {
        assert_eq!(Reply::parse("open heatcoil.temp\n").unwrap(), Reply::Opened(Channel::Temperature));
        assert_eq!(Reply::parse("ok 1").unwrap(), Reply::Written(1));
        assert_eq!(
            Reply::parse("refused 2200 2151").unwrap(),
            Reply::Refused { ticks: 2200, soft_limit: 2151 }
        );
        assert_eq!(
            Reply::parse("fault unknown channel selector 7").unwrap(),
            Reply::Fault("unknown channel selector 7".into())
        );
        assert!(Reply::parse("ok many").is_err());
        assert!(Reply::parse("hello").is_err());
    }

    #[test]
    fn test_execute_against_status_channel() {
        let (surface, interlock) = surface();
        let status = surface.open(Channel::Status);

        assert_eq!(execute(&status, Request::Write("1")), Reply::Written(1));
        assert_eq!(execute(&status, Request::Read), Reply::Data("1".into()));

        interlock.publish_sample(TemperatureReading::from_ticks(2200)).unwrap();
        assert_eq!(execute(&status, Request::Write("0")), Reply::Written(1));
        assert_eq!(
            execute(&status, Request::Write("1")),
            Reply::Refused { ticks: 2200, soft_limit: 2151 }
        );
    }

    #[test]
    fn test_execute_against_temperature_channel() {
        let (surface, interlock) = surface();
        interlock.publish_sample(TemperatureReading::from_ticks(812)).unwrap();
        let temp = surface.open(Channel::Temperature);

        assert_eq!(execute(&temp, Request::Read), Reply::Data("812".into()));
        assert_eq!(execute(&temp, Request::Write("1")), Reply::Written(1));
        assert!(!interlock.heater().is_on());
    }
}
