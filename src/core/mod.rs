//! Core constants, error types and capability traits.
//!
//! Always compiled; nothing here needs an async runtime.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
