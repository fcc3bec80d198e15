//! Error types for kvwire operations

use crate::value::Shape;
use std::io;
use thiserror::Error;

/// Result type for kvwire operations
pub type KvResult<T> = Result<T, KvError>;

/// Comprehensive error type for client operations
#[derive(Error, Debug)]
pub enum KvError {
    /// Malformed bytes on the wire. Fatal for the connection that produced them.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// The reply's shape does not match the requested type
    #[error("Decode error: expected {expected}, got {actual}")]
    Decode {
        /// What the caller asked for
        expected: &'static str,
        /// What the wire actually carried
        actual: Shape,
    },

    /// A sequence cursor was asked for more elements than it holds
    #[error("Decode error: read past end of sequence (position {position}, length {len})")]
    Exhausted {
        /// Zero-based index of the element that was requested
        position: usize,
        /// Number of elements the cursor covers
        len: usize,
    },

    /// The connection is closed, reset or was cancelled
    #[error("Connection error: {0}")]
    Connection(String),

    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Sentinel lookup failed
    #[error("Sentinel error: {0}")]
    Sentinel(String),
}

/// Coarse classification of a [`KvError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Framing failure, fatal for the connection
    Protocol,
    /// Error reply from the server, the connection stays usable
    Server,
    /// Shape mismatch between the reply and the requested type
    Decode,
    /// Transport failure: closed, reset, cancelled, timed out
    Connection,
    /// Rejected before any connection was attempted
    Config,
}

impl KvError {
    /// Build a decode error for `expected` from the shape of the offending value
    #[must_use]
    pub const fn decode(expected: &'static str, actual: Shape) -> Self {
        Self::Decode { expected, actual }
    }

    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Server(_) => ErrorKind::Server,
            Self::Decode { .. } | Self::Exhausted { .. } => ErrorKind::Decode,
            Self::Connection(_) | Self::Io(_) | Self::Timeout | Self::Sentinel(_) => {
                ErrorKind::Connection
            }
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Check if the error is a transport-level failure
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection)
    }

    /// Check if the error came from a server error reply
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    /// Check if the error is a reply shape mismatch
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Decode)
    }

    /// The leading error code of a server error (`WRONGTYPE`, `NOSCRIPT`, ...)
    #[must_use]
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::Server(msg) => msg.split_whitespace().next(),
            _ => None,
        }
    }

    /// Produce an equivalent error for fan-out to several waiters.
    ///
    /// `io::Error` is not `Clone`, so transport failures are flattened into
    /// [`KvError::Connection`] carrying the original message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Protocol(msg) => Self::Connection(format!("protocol error: {msg}")),
            Self::Server(msg) => Self::Server(msg.clone()),
            Self::Decode { expected, actual } => Self::Decode {
                expected: *expected,
                actual: *actual,
            },
            Self::Exhausted { position, len } => Self::Exhausted {
                position: *position,
                len: *len,
            },
            Self::Connection(msg) => Self::Connection(msg.clone()),
            Self::Io(e) => Self::Connection(e.to_string()),
            Self::Timeout => Self::Timeout,
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Sentinel(msg) => Self::Sentinel(msg.clone()),
        }
    }
}
