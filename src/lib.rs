//! # relay-switch
//!
//! A named-endpoint TCP relay. Endpoints connect, authenticate under a short
//! ASCII name, then exchange opaque binary packets addressed by name. The
//! relay forwards each packet to every endpoint registered under the target
//! name, or under any name matching a wildcard target (`*`, `?`).
//!
//! - **Wire format**: fixed header (type, remote, local, length) + payload
//! - **Identity**: the relay rewrites the origin of every forwarded packet
//!   with the sender's verified name
//! - **Fan-out**: several endpoints may share a name; wildcards reach many
//!
//! ## Feature Flags
//!
//! - `server` (default): Relay server (sessions, name registry, dispatch)
//! - `client` (default): Async client library
//! - `cli` (default): Dependencies of the `relay-switchd` binary
//! - `compact-names`: 8-byte name fields instead of 16
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and capability traits (always included)
//! - [`transport`]: Packet record and codec (always included)
//! - [`server`]: Relay server (requires `server` feature)
//! - [`client`]: Relay client (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use relay_switch::prelude::*;
//!
//! let packet = Packet::new("PING", "red_", "blue", "hello").unwrap();
//! let bytes = packet.to_bytes();
//!
//! let mut decoder = PacketDecoder::new();
//! let decoded = decoder.decode_all(&bytes).unwrap();
//! assert_eq!(decoded, vec![packet]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire format (always included)
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::transport::*;

    #[cfg(feature = "client")]
    pub use crate::client::{ClientConfig, ClientError, RelayClient, RelayClientBuilder};

    #[cfg(feature = "server")]
    pub use crate::server::{
        CloseReason, NameRegistry, RelayServer, RelayServerBuilder, ServerConfig, ServerError,
        Session, SessionState,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{AuthError, RegistryError, RelayError};
pub use crate::transport::{Packet, PacketDecoder, PacketEncoder, PacketError};

#[cfg(feature = "client")]
pub use crate::client::RelayClient;

#[cfg(feature = "server")]
pub use crate::server::{RelayServer, RelayServerBuilder};
