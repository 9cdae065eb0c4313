//! Error types for the relay.

use thiserror::Error;

use crate::transport::PacketError;

/// Handshake failures. Each one closes the offending connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No valid handshake arrived before the deadline.
    #[error("authentication timeout")]
    Timeout,

    /// First packet was not an `AUTH` packet with an empty remote.
    #[error("invalid authentication packet")]
    InvalidPacket,

    /// The payload does not repeat the claimed local name.
    #[error("name does not match local: {payload:?} != {claimed:?}")]
    NameMismatch {
        /// Name claimed in the local field.
        claimed: String,
        /// Name carried in the payload.
        payload: String,
    },

    /// The name validator rejected the name.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// An `AUTH` packet arrived on an already authenticated session.
    #[error("re-authentication is not permitted")]
    Reauthentication,
}

/// Errors raised when adding a session to the name registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The session has not authenticated yet.
    #[error("attempted to register a session with no name")]
    Unnamed,

    /// The name contains wildcard metacharacters.
    #[error("attempted to register a session with wildcards in its name: {0:?}")]
    WildcardName(String),
}

/// Top-level relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Wire format error.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Handshake error.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
