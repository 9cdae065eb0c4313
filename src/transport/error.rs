//! Wire format error types.
//!
//! Every variant is local to one connection: the session that produced or
//! received the offending bytes is closed, nothing else is affected.

use thiserror::Error;

/// Packet validation and decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Declared length differs from the payload size.
    #[error("packet length mismatch: {actual} != {declared}")]
    LengthMismatch {
        /// Length the caller declared.
        declared: usize,
        /// Actual payload size.
        actual: usize,
    },

    /// Type field is not ASCII or is longer than the type width.
    #[error("invalid packet type: {0:?}")]
    InvalidType(String),

    /// Remote field is not ASCII or is longer than the name width.
    #[error("invalid packet remote: {0:?}")]
    InvalidRemote(String),

    /// Local field is not ASCII or is longer than the name width.
    #[error("invalid packet local: {0:?}")]
    InvalidLocal(String),

    /// Length cannot be represented without touching the foreign bit.
    #[error("invalid packet length: {0}")]
    InvalidLength(u64),

    /// Declared payload exceeds the configured limit.
    #[error("packet too large: {length} bytes (max {max})")]
    TooLarge {
        /// Declared payload length.
        length: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Result alias for wire format operations.
pub type PacketResult<T> = Result<T, PacketError>;
