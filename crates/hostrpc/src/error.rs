//! # Error Definitions
//!
//! Failures while building or reading a frame. These describe a broken message,
//! not a failed query: a query that fails inside the host travels as
//! `ResponseBody::Error`.

use hostpack::Error as PackError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying hostpack serialization failed.
    Pack(PackError),
    /// An unknown body, value or target variant was encountered.
    UnknownVariant(String),
    /// The message is structurally valid hostpack but not a valid frame.
    ProtocolViolation(String),
    /// Values nested deeper than `MAX_VALUE_DEPTH`.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "serialization: {}", e),
            Self::UnknownVariant(name) => write!(f, "unknown variant: {}", name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::RecursionLimitExceeded => write!(f, "value nesting limit exceeded"),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Pack(e) }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn missing(field: &str) -> Error {
    Error::ProtocolViolation(format!("Missing {}", field))
}
