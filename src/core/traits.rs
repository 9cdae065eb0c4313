//! Capability traits shared by sessions, the registry and the server.
//!
//! Components depend on each other only through these narrow interfaces:
//! the registry needs a name and a close notification, nothing more.

use std::fmt;
use std::sync::Arc;

use super::constants::MIN_NAME_LEN;

/// Something that may carry a verified endpoint name.
pub trait Nameable {
    /// The verified name, or `None` before authentication.
    fn name(&self) -> Option<&str>;
}

/// Callback invoked once when a [`Closable`] closes.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Something with an idempotent close and a one-shot close notification.
pub trait Closable {
    /// Reason type recorded on close.
    type Reason;

    /// Close. Only the first call has any effect.
    fn close(&self, reason: Self::Reason);

    /// Whether the object has closed.
    fn is_closed(&self) -> bool;

    /// Subscribe to the close notification.
    ///
    /// Every subscriber is called exactly once. Subscribing after the close
    /// already happened invokes the callback immediately.
    fn on_close(&self, callback: CloseCallback);
}

/// Predicate deciding which names a connection may authenticate as.
#[derive(Clone)]
pub struct NameValidator(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl NameValidator {
    /// Wrap a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Accept any non-empty name.
    pub fn permissive() -> Self {
        Self::new(|name| !name.is_empty())
    }

    /// Check a proposed name.
    pub fn validate(&self, name: &str) -> bool {
        (self.0)(name)
    }
}

impl Default for NameValidator {
    fn default() -> Self {
        Self::new(is_word_name)
    }
}

impl fmt::Debug for NameValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NameValidator(..)")
    }
}

/// Default naming rule: at least [`MIN_NAME_LEN`] word characters
/// (`[A-Za-z0-9_]`).
pub fn is_word_name(name: &str) -> bool {
    name.len() >= MIN_NAME_LEN && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
