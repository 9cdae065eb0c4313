//! Relay client library.
//!
//! Async API for endpoints that connect to a relay server.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
