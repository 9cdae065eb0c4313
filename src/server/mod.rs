//! Relay server.
//!
//! Accepts connections, authenticates each one as a named endpoint and
//! forwards packets between endpoints by name.

mod dispatch;
mod registry;
#[allow(clippy::module_inception)]
mod server;
mod session;
mod wildcard;

pub use dispatch::*;
pub use registry::*;
pub use server::*;
pub use session::*;
pub use wildcard::*;
