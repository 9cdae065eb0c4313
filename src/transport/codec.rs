//! Stream codec: bytes to packets and back.
//!
//! [`PacketDecoder`] folds an unbounded byte stream into packets. Input may be
//! split anywhere, down to a single byte per call; the decoder keeps the
//! partially parsed packet between calls and advances field by field
//! (type, remote, local, length, data). Every packet completed by a chunk is
//! pushed to the caller's callback before `decode` returns, in stream order.
//!
//! [`PacketEncoder`] serializes one packet per call.

use super::error::{PacketError, PacketResult};
use super::packet::Packet;
use crate::core::constants::{
    DEFAULT_MAX_DATA_LENGTH, FOREIGN_BIT, HEADER_LEN, LENGTH_LEN, MAX_WIRE_LENGTH, NAME_LEN,
    TYPE_LEN,
};

/// Fields of the packet currently being parsed.
#[derive(Debug, Default)]
struct PartialPacket {
    kind: Option<String>,
    remote: Option<String>,
    local: Option<String>,
    length: Option<(usize, bool)>,
}

/// Which text field is being read, for error reporting.
#[derive(Debug, Clone, Copy)]
enum Field {
    Kind,
    Remote,
    Local,
}

/// Incremental packet decoder.
#[derive(Debug)]
pub struct PacketDecoder {
    /// Bytes received but not yet consumed.
    buffer: Vec<u8>,
    /// Read position in `buffer`.
    cursor: usize,
    /// Packet in progress.
    partial: PartialPacket,
    /// Largest payload accepted.
    max_data_length: usize,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    /// Create a decoder with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_data_length(DEFAULT_MAX_DATA_LENGTH)
    }

    /// Create a decoder that rejects payloads larger than `max_data_length`.
    ///
    /// The limit never exceeds what the length field can carry.
    pub fn with_max_data_length(max_data_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            partial: PartialPacket::default(),
            max_data_length: max_data_length.min(MAX_WIRE_LENGTH as usize),
        }
    }

    /// Feed a chunk of the stream.
    ///
    /// Calls `on_packet` for every packet the chunk completes and returns how
    /// many were emitted. On error the decoder is reset; the stream it was
    /// reading is no longer trustworthy and should be closed.
    pub fn decode<F>(&mut self, chunk: &[u8], mut on_packet: F) -> PacketResult<usize>
    where
        F: FnMut(Packet),
    {
        self.buffer.extend_from_slice(chunk);

        let mut emitted = 0;
        loop {
            match self.next_packet() {
                Ok(Some(packet)) => {
                    on_packet(packet);
                    emitted += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }

        self.compact();
        Ok(emitted)
    }

    /// Decode every complete packet in `bytes`.
    pub fn decode_all(&mut self, bytes: &[u8]) -> PacketResult<Vec<Packet>> {
        let mut packets = Vec::new();
        self.decode(bytes, |packet| packets.push(packet))?;
        Ok(packets)
    }

    /// Number of buffered bytes not yet consumed by a complete field.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Whether the decoder sits exactly on a packet boundary.
    pub fn is_idle(&self) -> bool {
        self.buffered() == 0 && self.partial.kind.is_none()
    }

    /// Drop all buffered input and any partial packet.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.partial = PartialPacket::default();
    }

    /// Try to complete the packet in progress.
    fn next_packet(&mut self) -> PacketResult<Option<Packet>> {
        if self.partial.kind.is_none() {
            let Some(kind) = self.read_text(TYPE_LEN, Field::Kind)? else {
                return Ok(None);
            };
            self.partial.kind = Some(kind);
        }
        if self.partial.remote.is_none() {
            let Some(remote) = self.read_text(NAME_LEN, Field::Remote)? else {
                return Ok(None);
            };
            self.partial.remote = Some(remote);
        }
        if self.partial.local.is_none() {
            let Some(local) = self.read_text(NAME_LEN, Field::Local)? else {
                return Ok(None);
            };
            self.partial.local = Some(local);
        }
        let (length, foreign) = match self.partial.length {
            Some(length) => length,
            None => {
                let Some(raw) = self.take(LENGTH_LEN) else {
                    return Ok(None);
                };
                let field = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let foreign = field & FOREIGN_BIT != 0;
                let length = field & !FOREIGN_BIT;
                // Bit 31 is never set by a conforming encoder.
                if length > MAX_WIRE_LENGTH {
                    return Err(PacketError::InvalidLength(u64::from(length)));
                }
                let length = length as usize;
                if length > self.max_data_length {
                    return Err(PacketError::TooLarge {
                        length,
                        max: self.max_data_length,
                    });
                }
                self.partial.length = Some((length, foreign));
                (length, foreign)
            }
        };
        let Some(data) = self.take(length) else {
            return Ok(None);
        };
        let data = data.to_vec();

        let partial = std::mem::take(&mut self.partial);
        Ok(Some(Packet::from_wire(
            partial.kind.unwrap_or_default(),
            partial.remote.unwrap_or_default(),
            partial.local.unwrap_or_default(),
            data,
            foreign,
        )))
    }

    /// Read a NUL-terminated ASCII field of fixed width.
    fn read_text(&mut self, width: usize, field: Field) -> PacketResult<Option<String>> {
        let Some(raw) = self.take(width) else {
            return Ok(None);
        };
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let raw = &raw[..end];
        let text = String::from_utf8_lossy(raw).into_owned();
        if !raw.is_ascii() {
            return Err(match field {
                Field::Kind => PacketError::InvalidType(text),
                Field::Remote => PacketError::InvalidRemote(text),
                Field::Local => PacketError::InvalidLocal(text),
            });
        }
        Ok(Some(text))
    }

    /// Consume `n` bytes if that many are buffered.
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.buffered() < n {
            return None;
        }
        let start = self.cursor;
        self.cursor += n;
        Some(&self.buffer[start..self.cursor])
    }

    /// Discard consumed bytes.
    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

/// Packet serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketEncoder;

impl PacketEncoder {
    /// Create an encoder.
    pub fn new() -> Self {
        Self
    }

    /// Serialize a packet into a fresh buffer.
    pub fn encode(&self, packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::with_capacity(packet.wire_len());
        self.encode_into(packet, &mut buf);
        buf
    }

    /// Append a serialized packet to `dst`.
    pub fn encode_into(&self, packet: &Packet, dst: &mut Vec<u8>) {
        dst.reserve(HEADER_LEN + packet.len());
        put_text(dst, packet.kind(), TYPE_LEN);
        put_text(dst, packet.remote(), NAME_LEN);
        put_text(dst, packet.local(), NAME_LEN);
        dst.extend_from_slice(&packet.length_field().to_be_bytes());
        dst.extend_from_slice(packet.data());
    }
}

/// Write `text` NUL-padded to `width` bytes.
fn put_text(dst: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = &text.as_bytes()[..text.len().min(width)];
    dst.extend_from_slice(bytes);
    dst.resize(dst.len() + (width - bytes.len()), 0);
}

impl Packet {
    /// Serialize this packet.
    pub fn to_bytes(&self) -> Vec<u8> {
        PacketEncoder.encode(self)
    }
}
