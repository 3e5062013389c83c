use thiserror::Error;

use crate::gpio::{Direction, Edge};
use crate::pins::NumberingMode;

/// Broad class of a failure, used by callers that only care whether a retry or a fix of their
/// own input could help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Resolution,
    HardwareIo,
    Lifecycle,
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Numbering mode not set, call set_numbering_mode first")]
    ModeNotSet,
    #[error("Numbering mode already set to {0}")]
    ModeAlreadySet(NumberingMode),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Pin {position} out of range, expected below {len}")]
    OutOfRange { position: u32, len: usize },
    #[error("Pin {0} has no GPIO mapping")]
    UnmappedPin(u32),
    #[error("Malformed pin name {0:?}, expected GPIO<bank>_<pad><index>")]
    MalformedName(String),
    #[error("Pin {name} translates to channel {channel}, which is not wired on this board")]
    UnwiredChannel { name: String, channel: u32 },
    #[error("Unable to export channel {0}")]
    ExportFailed(u32),
    #[error("Channel {0} is not exported")]
    NotExported(u32),
    #[error("Channel {channel} direction reads back as {actual}, expected {expected}")]
    DirectionMismatch {
        channel: u32,
        expected: Direction,
        actual: Direction,
    },
    #[error("Channel {0} is not configured as an output")]
    WrongDirection(u32),
    #[error("Invalid edge: {0}")]
    InvalidEdge(String),
    #[error("Channel {channel} edge reads back as {actual}, expected {expected}")]
    EdgeMismatch {
        channel: u32,
        expected: Edge,
        actual: Edge,
    },
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("No event detection registered for channel {0}")]
    NoSuchWatcher(u32),
    #[error("Event detection on channel {0} cannot be replaced from its own callback")]
    WatcherBusy(u32),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl GpioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GpioError::ModeNotSet
            | GpioError::ModeAlreadySet(_)
            | GpioError::InvalidIdentifier(_)
            | GpioError::InvalidEdge(_)
            | GpioError::Config(_) => ErrorKind::Usage,
            GpioError::OutOfRange { .. }
            | GpioError::UnmappedPin(_)
            | GpioError::MalformedName(_)
            | GpioError::UnwiredChannel { .. } => ErrorKind::Resolution,
            GpioError::ExportFailed(_)
            | GpioError::NotExported(_)
            | GpioError::DirectionMismatch { .. }
            | GpioError::WrongDirection(_)
            | GpioError::EdgeMismatch { .. }
            | GpioError::InvalidValue(_)
            | GpioError::Gpio(_) => ErrorKind::HardwareIo,
            GpioError::NoSuchWatcher(_) | GpioError::WatcherBusy(_) => ErrorKind::Lifecycle,
        }
    }
}
