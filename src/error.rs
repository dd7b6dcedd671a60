use crate::lines::{LineError, LineRole};
use thiserror::Error;

/// Crate-level error. Thermal breaches are never reported through this type;
/// they are safety transitions, not failures.
#[derive(Debug, Error)]
pub enum InterlockError {
    /// A line could not be reserved. Fatal to controller start-up.
    #[error("{role} line (gpio {pin}) unavailable: {source}")]
    LineUnavailable {
        role: LineRole,
        pin: u32,
        #[source]
        source: LineError,
    },

    /// A reserved line failed to read or write.
    #[error("{role} line (gpio {pin}) i/o failed: {source}")]
    LineIo {
        role: LineRole,
        pin: u32,
        #[source]
        source: LineError,
    },

    #[error("unknown channel selector {0}")]
    InvalidChannel(u32),

    #[error("unknown channel name {0:?}")]
    UnknownChannel(String),

    #[error("caller buffer too small: need {needed} bytes, got {available}")]
    Transfer { needed: usize, available: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("watchdog task failed: {0}")]
    Watchdog(String),
}

pub type Result<T> = core::result::Result<T, InterlockError>;
