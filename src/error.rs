//! Error types for tag operations.

use thiserror::Error;

use crate::apdu::StatusWord;
use crate::transport::TransportError;

/// Errors that can occur while talking to a tag.
#[derive(Debug, Error)]
pub enum Error {
    /// Reader unreachable or tag removed from the field.
    #[error("connection error: {0}")]
    Connection(String),

    /// Handshake rejected, or a secure command attempted without a live session.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Tag answered a well-formed command with a non-success status.
    #[error("command 0x{command:02X} rejected: {status}")]
    Command { command: u8, status: StatusWord },

    /// Response length or structure does not fit the exchange.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Input rejected before anything was sent to the tag.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No master key configured for the requested slot.
    #[error("no master key for slot {0}")]
    UnknownKeySlot(u8),
}

impl Error {
    /// True for errors that leave no usable session behind.
    ///
    /// A malformed handshake response is as fatal as an explicit rejection.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::Authentication(_) | Error::Protocol(_))
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Connection(e.to_string())
    }
}

/// Result type for tag operations.
pub type Result<T> = std::result::Result<T, Error>;
