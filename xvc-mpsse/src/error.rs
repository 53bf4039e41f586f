use std::{error::Error, fmt::Display};

use libftd2xx::FtStatus;

/// Faults raised by the shift engine and its transport.
///
/// Everything here is fatal for the session that triggered it; `Driver`,
/// `PartialWrite` and `ReadTimeout` additionally mean the adapter needs a
/// reopen before it can be trusted again.
#[derive(Debug)]
pub enum MpsseError {
    /// A vendor driver call returned a non-OK status.
    Driver { op: &'static str, status: FtStatus },
    /// The driver accepted fewer bytes than requested.
    PartialWrite { wrote: usize, requested: usize },
    /// The expected response bytes never arrived.
    ReadTimeout { got: usize, expected: usize },
    /// No device matched the selector.
    NoDevice(String),
    /// The selector form is valid but this driver cannot open by it.
    UnsupportedSelector(String),
    /// A scan was invoked with vectors shorter than its bit count.
    VectorLength { need: usize, got: usize },
}

impl MpsseError {
    pub(crate) fn driver(op: &'static str, status: FtStatus) -> MpsseError {
        MpsseError::Driver { op, status }
    }
}

impl Display for MpsseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MpsseError::Driver { op, status } => write!(f, "{} failed: {:?}", op, status),
            MpsseError::PartialWrite { wrote, requested } => {
                write!(f, "partial USB write: {} of {} bytes", wrote, requested)
            }
            MpsseError::ReadTimeout { got, expected } => {
                write!(f, "USB read timeout: {} of {} bytes", got, expected)
            }
            MpsseError::NoDevice(selector) => {
                write!(f, "no FTDI device matches {}", selector)
            }
            MpsseError::UnsupportedSelector(selector) => {
                write!(f, "cannot open device by {}", selector)
            }
            MpsseError::VectorLength { need, got } => {
                write!(f, "vector too short: need {} bytes, got {}", need, got)
            }
        }
    }
}

impl Error for MpsseError {}
