//! Name registry.
//!
//! Maps verified endpoint names to the open sessions bound to them. Several
//! sessions may share one name; a packet addressed to that name reaches all
//! of them. Targets containing `*` or `?` are resolved against every
//! registered name.
//!
//! Sessions leave the registry on their own: registration subscribes to the
//! session's close notification, and the subscription only holds a weak
//! reference back to the registry.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::info;

use super::session::{Session, SessionId};
use super::wildcard::{WildcardPattern, is_wildcard};
use crate::core::{Closable, Nameable, RegistryError};

type Bindings = HashMap<String, BTreeMap<SessionId, Session>>;

/// Shared name → sessions table. Clones share the same table.
#[derive(Clone, Default)]
pub struct NameRegistry {
    bindings: Arc<Mutex<Bindings>>,
}

impl NameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session under its verified name.
    ///
    /// The binding is removed automatically when the session closes.
    /// Registering an already closed session is a no-op.
    pub fn register(&self, session: &Session) -> Result<(), RegistryError> {
        let name = session.name().ok_or(RegistryError::Unnamed)?.to_owned();
        if is_wildcard(&name) {
            return Err(RegistryError::WildcardName(name));
        }

        let id = session.id();
        let address = session.address();
        self.lock()
            .entry(name.clone())
            .or_default()
            .insert(id, session.clone());
        info!(%name, session = %address, %id, "registered session");

        // Subscribe outside the lock: an already closed session runs the
        // callback immediately, and the callback takes the lock.
        let bindings = Arc::downgrade(&self.bindings);
        session.on_close(Box::new(move || {
            remove_binding(&bindings, &name, id, address);
        }));
        Ok(())
    }

    /// Remove a session's binding. Returns whether it was bound.
    pub fn deregister(&self, session: &Session) -> bool {
        match session.name() {
            Some(name) => remove(&mut self.lock(), name, session.id(), session.address()),
            None => false,
        }
    }

    /// Sessions a target reaches.
    ///
    /// A plain name is an exact lookup. A wildcard target yields the union of
    /// the sessions under every matching name, each session once.
    pub fn resolve(&self, target: &str) -> Vec<Session> {
        let bindings = self.lock();
        if !is_wildcard(target) {
            return bindings
                .get(target)
                .map(|sessions| sessions.values().cloned().collect())
                .unwrap_or_default();
        }

        let pattern = WildcardPattern::new(target);
        let mut matched = BTreeMap::new();
        for (_, sessions) in bindings.iter().filter(|(name, _)| pattern.matches(name)) {
            for (id, session) in sessions {
                matched.entry(*id).or_insert_with(|| session.clone());
            }
        }
        matched.into_values().collect()
    }

    /// Whether any session is bound to `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of distinct registered names.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of registered sessions across all names.
    pub fn session_count(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    /// Every registered session.
    pub fn sessions(&self) -> Vec<Session> {
        self.lock()
            .values()
            .flat_map(|sessions| sessions.values().cloned())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Bindings> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Close-notification target. Does nothing once the registry is gone.
fn remove_binding(
    bindings: &Weak<Mutex<Bindings>>,
    name: &str,
    id: SessionId,
    address: SocketAddr,
) {
    if let Some(bindings) = bindings.upgrade() {
        let mut bindings = bindings.lock().unwrap_or_else(PoisonError::into_inner);
        remove(&mut bindings, name, id, address);
    }
}

fn remove(bindings: &mut Bindings, name: &str, id: SessionId, address: SocketAddr) -> bool {
    let Some(sessions) = bindings.get_mut(name) else {
        return false;
    };
    let removed = sessions.remove(&id).is_some();
    if sessions.is_empty() {
        bindings.remove(name);
    }
    if removed {
        info!(%name, session = %address, %id, "unregistered session");
    }
    removed
}
