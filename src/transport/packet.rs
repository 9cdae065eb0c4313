//! The relay packet record.
//!
//! A [`Packet`] is validated when it is built and every mutator re-checks the
//! field it touches, so a packet that exists can always be encoded.
//!
//! Wire format (all integers big-endian):
//! ```text
//! +----------+------------+------------+------------------+-----------------+
//! | Type     | Remote     | Local      | Length | Foreign | Data            |
//! | 4 bytes  | NAME_LEN   | NAME_LEN   | 4 bytes (BE32)   | Length bytes    |
//! +----------+------------+------------+------------------+-----------------+
//! ```
//! Text fields are ASCII, NUL-padded. Bit 30 of the length field is the
//! foreign flag.

use std::fmt;

use super::error::{PacketError, PacketResult};
use crate::core::constants::{
    AUTH_TYPE, FOREIGN_BIT, HEADER_LEN, MAX_WIRE_LENGTH, NAME_LEN, PREVIEW_MAX_LEN, TYPE_LEN,
};

/// One relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: String,
    remote: String,
    local: String,
    data: Vec<u8>,
    foreign: bool,
}

impl Packet {
    /// Build a packet with the foreign flag clear.
    pub fn new(
        kind: impl Into<String>,
        remote: impl Into<String>,
        local: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> PacketResult<Self> {
        Self::builder(kind).remote(remote).local(local).data(data).build()
    }

    /// Start building a packet of the given type.
    pub fn builder(kind: impl Into<String>) -> PacketBuilder {
        PacketBuilder::new(kind)
    }

    /// The handshake packet a client sends to claim `name`.
    pub fn auth(name: &str) -> PacketResult<Self> {
        Self::new(AUTH_TYPE, "", name, name.as_bytes())
    }

    /// Assemble a packet from fields that were already checked by the decoder.
    pub(crate) fn from_wire(
        kind: String,
        remote: String,
        local: String,
        data: Vec<u8>,
        foreign: bool,
    ) -> Self {
        Self {
            kind,
            remote,
            local,
            data,
            foreign,
        }
    }

    /// Packet type, e.g. `AUTH` or `PING`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Target name or wildcard pattern.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Origin name as claimed by the sender.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the packet and return its payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the packet was already relayed once.
    pub fn is_foreign(&self) -> bool {
        self.foreign
    }

    /// Whether this is a handshake packet.
    pub fn is_auth(&self) -> bool {
        self.kind == AUTH_TYPE
    }

    /// Set or clear the foreign flag.
    pub fn set_foreign(&mut self, foreign: bool) {
        self.foreign = foreign;
    }

    /// Replace the remote field.
    pub fn set_remote(&mut self, remote: impl Into<String>) -> PacketResult<()> {
        let remote = remote.into();
        if !is_wire_text(&remote, NAME_LEN) {
            return Err(PacketError::InvalidRemote(remote));
        }
        self.remote = remote;
        Ok(())
    }

    /// Replace the local field.
    pub fn set_local(&mut self, local: impl Into<String>) -> PacketResult<()> {
        let local = local.into();
        if !is_wire_text(&local, NAME_LEN) {
            return Err(PacketError::InvalidLocal(local));
        }
        self.local = local;
        Ok(())
    }

    /// Value of the length field on the wire, flag bit included.
    pub fn length_field(&self) -> u32 {
        // Construction guarantees the length fits below the flag bit.
        let length = self.data.len() as u32;
        if self.foreign {
            length | FOREIGN_BIT
        } else {
            length
        }
    }

    /// Size of the encoded packet.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// The payload as text, if it is entirely printable ASCII or whitespace.
    pub fn data_as_text(&self) -> Option<&str> {
        if self.data.iter().all(|&b| is_printable(b)) {
            std::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    /// A short human-readable rendering of the payload for logs.
    pub fn preview(&self) -> PayloadPreview<'_> {
        PayloadPreview(&self.data)
    }
}

/// Log rendering of a payload: the text itself when short and printable,
/// otherwise a byte count.
#[derive(Debug, Clone, Copy)]
pub struct PayloadPreview<'a>(&'a [u8]);

impl fmt::Display for PayloadPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = self.0.len() < PREVIEW_MAX_LEN && self.0.iter().all(|&b| is_printable(b));
        match std::str::from_utf8(self.0) {
            Ok(text) if printable => write!(f, "{text:?}"),
            _ => write!(f, "<{} bytes>", self.0.len()),
        }
    }
}

/// Builder for [`Packet`].
///
/// Validation runs in [`PacketBuilder::build`], in wire order: declared
/// length, type, remote, local, then the representable length range.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    kind: String,
    remote: String,
    local: String,
    data: Vec<u8>,
    length: Option<usize>,
    foreign: bool,
}

impl PacketBuilder {
    /// Create a builder for a packet of the given type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            remote: String::new(),
            local: String::new(),
            data: Vec::new(),
            length: None,
            foreign: false,
        }
    }

    /// Set the target name or pattern.
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Set the claimed origin name.
    pub fn local(mut self, local: impl Into<String>) -> Self {
        self.local = local.into();
        self
    }

    /// Set the payload. Text payloads are sent as their bytes.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Declare the payload length explicitly; it must match the payload.
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the foreign flag.
    pub fn foreign(mut self, foreign: bool) -> Self {
        self.foreign = foreign;
        self
    }

    /// Validate and build the packet.
    pub fn build(self) -> PacketResult<Packet> {
        let length = self.length.unwrap_or(self.data.len());
        if length != self.data.len() {
            return Err(PacketError::LengthMismatch {
                declared: length,
                actual: self.data.len(),
            });
        }
        if !is_wire_text(&self.kind, TYPE_LEN) {
            return Err(PacketError::InvalidType(self.kind));
        }
        if !is_wire_text(&self.remote, NAME_LEN) {
            return Err(PacketError::InvalidRemote(self.remote));
        }
        if !is_wire_text(&self.local, NAME_LEN) {
            return Err(PacketError::InvalidLocal(self.local));
        }
        if length > MAX_WIRE_LENGTH as usize {
            return Err(PacketError::InvalidLength(length as u64));
        }
        Ok(Packet {
            kind: self.kind,
            remote: self.remote,
            local: self.local,
            data: self.data,
            foreign: self.foreign,
        })
    }
}

/// A text field fits on the wire: ASCII, no NUL, at most `width` bytes.
pub(crate) fn is_wire_text(value: &str, width: usize) -> bool {
    value.len() <= width && value.bytes().all(|b| b.is_ascii() && b != 0)
}

fn is_printable(byte: u8) -> bool {
    byte.is_ascii_graphic() || byte.is_ascii_whitespace()
}
