//! Relay wire protocol.
//!
//! This module implements the packet layer shared by the server and clients:
//!
//! - **Packet record**: [`Packet`], validated at construction
//! - **Decoding**: [`PacketDecoder`] folds a TCP byte stream into packets
//! - **Encoding**: [`PacketEncoder`] serializes a packet to bytes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    Session / dispatch (server, client)  │
//! ├─────────────────────────────────────────┤
//! │         Packet codec                    │  ← This module
//! │   fixed header, NUL-padded names        │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The codec has no I/O and no runtime dependency; callers feed it bytes and
//! write out the buffers it produces.

mod codec;
mod error;
mod packet;

pub use codec::*;
pub use error::*;
pub use packet::*;
