use std::{error::Error, fmt::Display, io, num::ParseIntError, str::Utf8Error};

/// Errors raised while decoding protocol traffic from a stream.
#[derive(Debug)]
pub enum ProtocolError {
    Io(io::Error),
    /// The two-byte dispatch prefix matched no known command.
    UnknownPrefix([u8; 2]),
    /// The prefix matched but the rest of the command name did not.
    MalformedCommand(String),
    /// A `shift:` announced more vector bytes than the negotiated capacity.
    VectorTooLarge { cap: usize, got: usize },
    /// The server banner could not be parsed.
    MalformedInfo(String),
    /// The server banner names a protocol revision this crate does not speak.
    UnsupportedVersion(String),
}

impl From<io::Error> for ProtocolError {
    fn from(value: io::Error) -> Self {
        ProtocolError::Io(value)
    }
}

impl From<Utf8Error> for ProtocolError {
    fn from(value: Utf8Error) -> Self {
        ProtocolError::MalformedInfo(format!("invalid UTF-8: {}", value))
    }
}

impl From<ParseIntError> for ProtocolError {
    fn from(value: ParseIntError) -> Self {
        ProtocolError::MalformedInfo(format!("invalid integer: {}", value))
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "{}", e),
            ProtocolError::UnknownPrefix(p) => write!(
                f,
                "unknown command prefix {:02x} {:02x} ('{}{}')",
                p[0], p[1], p[0] as char, p[1] as char
            ),
            ProtocolError::MalformedCommand(cmd) => {
                write!(f, "malformed command '{}'", cmd)
            }
            ProtocolError::VectorTooLarge { cap, got } => write!(
                f,
                "shift vector of {} bytes exceeds the {} byte capacity",
                got, cap
            ),
            ProtocolError::MalformedInfo(what) => write!(f, "bad server banner: {}", what),
            ProtocolError::UnsupportedVersion(v) => {
                write!(f, "unsupported protocol version {}", v)
            }
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            _ => None,
        }
    }
}
