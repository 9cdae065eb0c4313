//! Relay client.
//!
//! Connects to a relay server, authenticates under a name, then sends and
//! receives packets addressed by endpoint name.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::core::constants::{
    CONNECT_TIMEOUT, DEFAULT_MAX_DATA_LENGTH, DEFAULT_PORT, READ_BUFFER_SIZE,
};
use crate::transport::{Packet, PacketDecoder, PacketEncoder, PacketError};

/// Errors that can occur in the relay client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to connect to server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed packet, outgoing or incoming.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection.
    #[error("client disconnected")]
    Disconnected,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server_addr: SocketAddr,

    /// Name to authenticate as.
    pub local: String,

    /// Bound on connecting and on waiting for the handshake reply.
    pub connect_timeout: Duration,

    /// Set TCP_NODELAY on the connection.
    pub no_delay: bool,

    /// Largest accepted inbound payload.
    pub max_data_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            local: String::new(),
            connect_timeout: CONNECT_TIMEOUT,
            no_delay: true,
            max_data_length: DEFAULT_MAX_DATA_LENGTH,
        }
    }
}

/// Builder for a [`ClientConfig`].
#[derive(Debug)]
pub struct RelayClientBuilder {
    config: ClientConfig,
}

impl RelayClientBuilder {
    /// Create a builder for a client named `local`.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                local: local.into(),
                ..ClientConfig::default()
            },
        }
    }

    /// Set the server address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the connect and handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.config.no_delay = enabled;
        self
    }

    /// Set the largest accepted inbound payload.
    pub fn max_data_length(mut self, max: usize) -> Self {
        self.config.max_data_length = max;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Connect with the built configuration.
    pub async fn connect(self) -> Result<RelayClient, ClientError> {
        RelayClient::connect_with(self.config).await
    }
}

/// An authenticated connection to a relay server.
///
/// # Example
///
/// ```no_run
/// use relay_switch::client::RelayClient;
///
/// # async fn run() -> Result<(), relay_switch::client::ClientError> {
/// let mut client = RelayClient::connect("127.0.0.1:49501".parse().unwrap(), "blue").await?;
/// client.send_text("PING", "red_", "hello").await?;
/// while let Some(packet) = client.recv().await? {
///     println!("{} from {}", packet.kind(), packet.remote());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RelayClient {
    name: String,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: PacketDecoder,
    encoder: PacketEncoder,
    pending: VecDeque<Packet>,
    buf: Vec<u8>,
}

impl RelayClient {
    /// Connect to `addr` and authenticate as `local`.
    pub async fn connect(addr: SocketAddr, local: &str) -> Result<Self, ClientError> {
        Self::connect_with(RelayClientBuilder::new(local).server_addr(addr).build()).await
    }

    /// Connect and authenticate using `config`.
    ///
    /// Fails with [`ClientError::HandshakeFailed`] unless the server's first
    /// packet is the `AUTH` reply.
    pub async fn connect_with(config: ClientConfig) -> Result<Self, ClientError> {
        let auth = Packet::auth(&config.local)?;

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.server_addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(|e| ClientError::ConnectionFailed(format!("{}: {e}", config.server_addr)))?;
        stream.set_nodelay(config.no_delay)?;

        let (reader, writer) = stream.into_split();
        let mut client = Self {
            name: config.local,
            reader,
            writer,
            decoder: PacketDecoder::with_max_data_length(config.max_data_length),
            encoder: PacketEncoder::new(),
            pending: VecDeque::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
        };

        client.send(&auth).await?;
        let reply = tokio::time::timeout(config.connect_timeout, client.recv())
            .await
            .map_err(|_| ClientError::Timeout)??;
        match reply {
            Some(packet) if packet.is_auth() => {
                debug!(name = %client.name, server = %config.server_addr, "authenticated");
                Ok(client)
            }
            Some(packet) => Err(ClientError::HandshakeFailed(format!(
                "expected AUTH reply, got {}",
                packet.kind()
            ))),
            None => Err(ClientError::HandshakeFailed(
                "connection closed during handshake".into(),
            )),
        }
    }

    /// The name this client authenticated as.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a packet as-is.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let bytes = self.encoder.encode(packet);
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Send `data` to `remote` with this client's name as `local`.
    pub async fn send_packet(
        &mut self,
        kind: &str,
        remote: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), ClientError> {
        let packet = Packet::new(kind, remote, self.name.as_str(), data)?;
        self.send(&packet).await
    }

    /// Send a text payload to `remote`.
    pub async fn send_text(
        &mut self,
        kind: &str,
        remote: &str,
        text: &str,
    ) -> Result<(), ClientError> {
        self.send_packet(kind, remote, text).await
    }

    /// Next packet from the server, or `None` once the server closed the
    /// connection.
    ///
    /// Cancel safe: dropping the future loses no packets.
    pub async fn recv(&mut self) -> Result<Option<Packet>, ClientError> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let pending = &mut self.pending;
            self.decoder
                .decode(&self.buf[..n], |packet| pending.push_back(packet))?;
        }
    }

    /// Like [`recv`](Self::recv), but a closed connection is an error.
    pub async fn recv_packet(&mut self) -> Result<Packet, ClientError> {
        self.recv().await?.ok_or(ClientError::Disconnected)
    }

    /// Close the write side and drop the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
