//! Packet dispatch between sessions.
//!
//! Packets are routed by their `remote` field through the [`NameRegistry`].
//! Before delivery each copy is re-addressed: `remote` becomes the sender's
//! verified name and `local` the recipient's registered name, so a receiver
//! always sees "from `remote`, to me".

use std::fmt;

use tracing::{debug, info, warn};

use super::registry::NameRegistry;
use super::session::{CloseReason, Session, SessionHandler};
use crate::core::{AuthError, Closable, Nameable};
use crate::transport::Packet;

/// Relay-side [`SessionHandler`]: registers opened sessions and forwards
/// their packets.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: NameRegistry,
    dump_packets: bool,
}

impl Dispatcher {
    /// Dispatcher over `registry`.
    pub fn new(registry: NameRegistry, dump_packets: bool) -> Self {
        Self {
            registry,
            dump_packets,
        }
    }

    /// The registry packets are routed through.
    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Route one packet from `sender`. Returns the number of recipients.
    pub fn dispatch(&self, sender: &Session, mut packet: Packet) -> usize {
        if packet.is_auth() {
            warn!(session = %sender, "re-authentication attempt");
            sender.close(CloseReason::Auth(AuthError::Reauthentication));
            return 0;
        }
        if packet.is_foreign() {
            debug!(session = %sender, to = packet.remote(), "dropping foreign packet");
            return 0;
        }
        let Some(sender_name) = sender.name() else {
            return 0;
        };

        // Never route back to the sender, under its verified or claimed name.
        let recipients: Vec<Session> = self
            .registry
            .resolve(packet.remote())
            .into_iter()
            .filter(|recipient| {
                recipient
                    .name()
                    .is_some_and(|name| name != sender_name && name != packet.local())
            })
            .collect();

        if self.dump_packets {
            let origin = Origin {
                verified: sender_name,
                claimed: packet.local(),
            };
            info!(
                from = %origin,
                to = packet.remote(),
                recipients = recipients.len(),
                kind = packet.kind(),
                data = %packet.preview(),
                "packet"
            );
        }
        if recipients.is_empty() {
            debug!(session = %sender, to = packet.remote(), "no recipients");
            return 0;
        }

        if let Err(e) = packet.set_remote(sender_name) {
            warn!(session = %sender, error = %e, "cannot re-address packet");
            return 0;
        }
        let mut delivered = 0;
        for recipient in recipients {
            let Some(name) = recipient.name() else {
                continue;
            };
            let mut copy = packet.clone();
            if copy.set_local(name).is_ok() {
                recipient.send(copy);
                delivered += 1;
            }
        }
        delivered
    }
}

impl SessionHandler for Dispatcher {
    fn on_open(&self, session: &Session) {
        if let Err(e) = self.registry.register(session) {
            session.close(CloseReason::Registration(e));
        }
    }

    fn on_packet(&self, session: &Session, packet: Packet) {
        self.dispatch(session, packet);
    }

    fn on_close(&self, session: &Session, reason: &CloseReason) {
        if session.name().is_none() {
            debug!(session = %session.address(), %reason, "unauthenticated connection closed");
        }
    }
}

/// Sender label for the packet dump: the verified name, plus the claimed one
/// when the two differ.
struct Origin<'a> {
    verified: &'a str,
    claimed: &'a str,
}

impl fmt::Display for Origin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.verified == self.claimed {
            f.write_str(self.verified)
        } else {
            write!(f, "{} ({:?})", self.verified, self.claimed)
        }
    }
}
