//! Protocol and deployment constants.
//!
//! The wire constants are a build-time contract shared by every participant
//! of a deployment. They are never negotiated in-band; a peer built with a
//! different `NAME_LEN` will silently misparse every packet.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Width of the packet type field.
pub const TYPE_LEN: usize = 4;

/// Width of each endpoint name field (remote and local).
#[cfg(not(feature = "compact-names"))]
pub const NAME_LEN: usize = 16;

/// Width of each endpoint name field (remote and local).
#[cfg(feature = "compact-names")]
pub const NAME_LEN: usize = 8;

/// Width of the length field.
pub const LENGTH_LEN: usize = 4;

/// Offset of the type field.
pub const TYPE_OFFSET: usize = 0;

/// Offset of the remote (target) field.
pub const REMOTE_OFFSET: usize = TYPE_OFFSET + TYPE_LEN;

/// Offset of the local (origin) field.
pub const LOCAL_OFFSET: usize = REMOTE_OFFSET + NAME_LEN;

/// Offset of the length field.
pub const LENGTH_OFFSET: usize = LOCAL_OFFSET + NAME_LEN;

/// Size of the fixed packet header; the payload starts here.
pub const HEADER_LEN: usize = LENGTH_OFFSET + LENGTH_LEN;

/// Flag bit in the length field marking a packet that was already relayed.
///
/// Bit 30 rather than 31 so the field stays a non-negative signed 32-bit
/// value for peers that only have signed integers.
pub const FOREIGN_BIT: u32 = 1 << 30;

/// Largest length the length field can carry without touching the flag bit.
pub const MAX_WIRE_LENGTH: u32 = FOREIGN_BIT - 1;

// =============================================================================
// PACKET TYPES
// =============================================================================

/// Handshake packet type.
pub const AUTH_TYPE: &str = "AUTH";

/// Keep-alive / echo request type used by clients by convention.
pub const PING_TYPE: &str = "PING";

/// Generic payload type used by clients by convention.
pub const DATA_TYPE: &str = "DATA";

// =============================================================================
// SERVER DEFAULTS
// =============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 49501;

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Time a fresh connection has to complete the handshake.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between a successful handshake and the session opening.
pub const OPENING_GRACE: Duration = Duration::from_millis(500);

/// Default TCP keep-alive idle time.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_DATA_LENGTH: usize = 16 * 1024 * 1024;

/// Default bound on bytes queued for one peer and not yet written.
pub const DEFAULT_MAX_BACKLOG: usize = 64 * 1024 * 1024;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "relay_switch=info";

/// Minimum accepted name length for the default name validator.
pub const MIN_NAME_LEN: usize = 4;

/// Read buffer size for connection reader tasks.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Payloads at or above this size are summarized as a byte count in packet dumps.
pub const PREVIEW_MAX_LEN: usize = 80;

// =============================================================================
// CLIENT DEFAULTS
// =============================================================================

/// Time a client waits for the server's handshake reply.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(REMOTE_OFFSET, 4);
        assert_eq!(LOCAL_OFFSET, 4 + NAME_LEN);
        assert_eq!(HEADER_LEN, 4 + 2 * NAME_LEN + 4);
    }

    #[test]
    fn test_foreign_bit_fits_signed_32() {
        assert!(i32::try_from(FOREIGN_BIT | MAX_WIRE_LENGTH).is_ok());
    }
}
