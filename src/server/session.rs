//! Per-connection session.
//!
//! Handles one accepted connection:
//! - Handshake (`AUTH` packet, name check, timeout)
//! - Lifecycle: Authenticating → Opening → Open, any state → Closed
//! - Outbound buffering while the session is not yet open
//! - Idempotent close with a one-shot close notification
//!
//! Each session runs two tasks. The reader task owns the read half and the
//! [`PacketDecoder`]; it feeds inbound packets through the state machine in
//! arrival order. The writer task owns the write half and drains a channel of
//! encoded buffers, which makes the channel the single write path for the
//! socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::constants::{
    AUTH_TIMEOUT, AUTH_TYPE, DEFAULT_MAX_BACKLOG, DEFAULT_MAX_DATA_LENGTH, OPENING_GRACE,
    READ_BUFFER_SIZE,
};
use crate::core::{AuthError, Closable, CloseCallback, NameValidator, Nameable, RegistryError};
use crate::transport::{Packet, PacketDecoder, PacketEncoder, PacketError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next identifier.
    pub fn allocate() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the handshake.
    Authenticating,
    /// Authenticated; outbound traffic is buffered until the grace period ends.
    Opening,
    /// Fully open.
    Open,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Lowercase state name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Eof,

    /// Socket error.
    #[error("transport error: {0}")]
    Io(String),

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] PacketError),

    /// Handshake failure or re-authentication attempt.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The registry refused the session.
    #[error("registration failed: {0}")]
    Registration(#[from] RegistryError),

    /// The peer stopped reading and unwritten output passed the limit.
    #[error("outbound backlog exceeded")]
    Backlog,

    /// Explicit close.
    #[error("close requested")]
    Requested,

    /// The server is shutting down.
    #[error("server shutting down")]
    Shutdown,
}

impl CloseReason {
    /// Whether the close was caused by a failure rather than a normal hang-up.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Eof | Self::Requested | Self::Shutdown)
    }
}

/// Notifications from a session to the relay layer.
pub trait SessionHandler: Send + Sync + 'static {
    /// The grace period ended and the session is about to open.
    fn on_open(&self, session: &Session);

    /// An inbound packet arrived on an authenticated session.
    fn on_packet(&self, session: &Session, packet: Packet);

    /// The session closed. Called once, before close subscribers run.
    fn on_close(&self, session: &Session, reason: &CloseReason) {
        let _ = (session, reason);
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake deadline.
    pub auth_timeout: Duration,
    /// Delay between handshake and open.
    pub opening_grace: Duration,
    /// Names a connection may claim.
    pub name_validator: NameValidator,
    /// Largest accepted inbound payload.
    pub max_data_length: usize,
    /// Most bytes queued for the peer but not yet written to the socket.
    /// Going past it closes the session with [`CloseReason::Backlog`].
    pub max_backlog: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: AUTH_TIMEOUT,
            opening_grace: OPENING_GRACE,
            name_validator: NameValidator::default(),
            max_data_length: DEFAULT_MAX_DATA_LENGTH,
            max_backlog: DEFAULT_MAX_BACKLOG,
        }
    }
}

/// Mutable session state, guarded by one lock.
struct Inner {
    state: SessionState,
    /// Packets queued until the session opens.
    outbound: Vec<Packet>,
    close_callbacks: Vec<CloseCallback>,
}

struct Shared {
    id: SessionId,
    address: SocketAddr,
    name: OnceLock<String>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    encoder: PacketEncoder,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Bytes accepted by `send` (or the handshake reply) and not yet written.
    backlog: AtomicUsize,
    cancel: CancellationToken,
    close_reason: OnceLock<CloseReason>,
    auth_timer: Mutex<Option<JoinHandle<()>>>,
    handler: Arc<dyn SessionHandler>,
}

/// Handle to one connection. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Start a session on an accepted stream.
    ///
    /// Spawns the reader and writer tasks and arms the authentication timer.
    /// The session's cancellation token is a child of `parent`, so cancelling
    /// `parent` closes the session with [`CloseReason::Shutdown`].
    pub fn spawn<S>(
        stream: S,
        address: SocketAddr,
        config: SessionConfig,
        handler: Arc<dyn SessionHandler>,
        parent: &CancellationToken,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = PacketDecoder::with_max_data_length(config.max_data_length);
        let auth_timeout = config.auth_timeout;

        let session = Self::new(address, config, handler, tx, parent.child_token());
        debug!(session = %address, "connection accepted");

        let timer_session = session.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(auth_timeout).await;
            timer_session.close(CloseReason::Auth(AuthError::Timeout));
        });
        *session.lock_timer() = Some(timer);

        tokio::spawn(write_loop(session.clone(), writer, rx));
        tokio::spawn(read_loop(session.clone(), reader, decoder));

        session
    }

    fn new(
        address: SocketAddr,
        config: SessionConfig,
        handler: Arc<dyn SessionHandler>,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: SessionId::allocate(),
                address,
                name: OnceLock::new(),
                config,
                inner: Mutex::new(Inner {
                    state: SessionState::Authenticating,
                    outbound: Vec::new(),
                    close_callbacks: Vec::new(),
                }),
                encoder: PacketEncoder::new(),
                tx,
                backlog: AtomicUsize::new(0),
                cancel,
                close_reason: OnceLock::new(),
                auth_timer: Mutex::new(None),
                handler,
            }),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Remote peer address.
    pub fn address(&self) -> SocketAddr {
        self.shared.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.shared.close_reason.get()
    }

    /// Bytes queued for the peer and not yet written to the socket.
    pub fn backlog(&self) -> usize {
        self.shared.backlog.load(Ordering::Acquire)
    }

    /// Wait until the session closes.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Queue a packet for the peer.
    ///
    /// Written immediately when open, buffered before that, dropped once
    /// closed. Never fails: a closed recipient is not an error. A packet that
    /// would push the backlog past `max_backlog` closes the session instead.
    pub fn send(&self, packet: Packet) {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                debug!(session = %self, kind = packet.kind(), "dropping tx packet");
                return;
            }
            if self.reserve(packet.wire_len()) {
                match inner.state {
                    SessionState::Open => self.write(&packet),
                    _ => inner.outbound.push(packet),
                }
                return;
            }
        }
        self.close(CloseReason::Backlog);
    }

    /// Close the session with [`CloseReason::Requested`].
    pub fn shutdown(&self) {
        self.close(CloseReason::Requested);
    }

    /// Account for `len` more queued bytes, unless that passes the limit.
    fn reserve(&self, len: usize) -> bool {
        let queued = self.shared.backlog.fetch_add(len, Ordering::AcqRel) + len;
        if queued > self.shared.config.max_backlog {
            self.shared.backlog.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Encode a packet onto the write channel.
    fn write(&self, packet: &Packet) {
        let bytes = self.shared.encoder.encode(packet);
        if self.shared.tx.send(bytes).is_err() {
            debug!(session = %self, "writer gone, dropping tx packet");
        }
    }

    /// Run an inbound packet through the state machine.
    fn receive(&self, packet: Packet) {
        match self.state() {
            SessionState::Authenticating => {
                if let Err(e) = self.authenticate(&packet) {
                    self.close(CloseReason::Auth(e));
                }
            }
            SessionState::Opening | SessionState::Open => {
                self.shared.handler.on_packet(self, packet);
            }
            SessionState::Closed => {
                debug!(session = %self, kind = packet.kind(), "dropping rx packet");
            }
        }
    }

    /// Check a handshake packet and complete authentication.
    fn authenticate(&self, packet: &Packet) -> Result<(), AuthError> {
        if packet.kind() != AUTH_TYPE || !packet.remote().is_empty() {
            return Err(AuthError::InvalidPacket);
        }
        let name = String::from_utf8_lossy(packet.data()).into_owned();
        if name != packet.local() {
            return Err(AuthError::NameMismatch {
                claimed: packet.local().to_owned(),
                payload: name,
            });
        }
        if !self.shared.config.name_validator.validate(&name) {
            return Err(AuthError::InvalidName(name));
        }

        // The name came out of the local field, so it fits in a reply.
        let reply = Packet::new(AUTH_TYPE, "", name.as_str(), Vec::new())
            .map_err(|_| AuthError::InvalidName(name.clone()))?;

        if let Some(timer) = self.lock_timer().take() {
            timer.abort();
        }
        let _ = self.shared.name.set(name);

        {
            let mut inner = self.lock();
            if inner.state != SessionState::Authenticating {
                return Ok(());
            }
            self.shared
                .backlog
                .fetch_add(reply.wire_len(), Ordering::AcqRel);
            self.write(&reply);
            self.set_state(&mut inner, SessionState::Opening);
        }
        info!(session = %self.address(), name = self.name().unwrap_or_default(), "authenticated");

        let session = self.clone();
        let grace = self.shared.config.opening_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            session.open();
        });
        Ok(())
    }

    /// End of the grace period: notify, open, flush the buffer.
    fn open(&self) {
        if self.state() != SessionState::Opening {
            return;
        }
        self.shared.handler.on_open(self);

        let mut inner = self.lock();
        // on_open may have closed us.
        if inner.state != SessionState::Opening {
            return;
        }
        self.set_state(&mut inner, SessionState::Open);
        for packet in std::mem::take(&mut inner.outbound) {
            self.write(&packet);
        }
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        debug!(session = %self, from = %inner.state, to = %state, "state transition");
        inner.state = state;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.shared
            .auth_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Nameable for Session {
    fn name(&self) -> Option<&str> {
        self.shared.name.get().map(String::as_str)
    }
}

impl Closable for Session {
    type Reason = CloseReason;

    fn close(&self, reason: CloseReason) {
        let callbacks = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            self.set_state(&mut inner, SessionState::Closed);
            inner.outbound.clear();
            std::mem::take(&mut inner.close_callbacks)
        };

        if let Some(timer) = self.lock_timer().take() {
            timer.abort();
        }
        self.shared.cancel.cancel();

        if reason.is_failure() {
            warn!(session = %self, %reason, "closing session");
        } else {
            debug!(session = %self, %reason, "closing session");
        }
        let _ = self.shared.close_reason.set(reason.clone());

        self.shared.handler.on_close(self, &reason);
        for callback in callbacks {
            callback();
        }
    }

    fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    fn on_close(&self, callback: CloseCallback) {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            drop(inner);
            callback();
        } else {
            inner.close_callbacks.push(callback);
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "\"{name}\" @ {}", self.shared.address),
            None => write!(f, "{}", self.shared.address),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("address", &self.shared.address)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Read, decode and dispatch until the session closes.
async fn read_loop<R>(session: Session, mut reader: R, mut decoder: PacketDecoder)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = session.shared.cancel.cancelled() => {
                session.close(CloseReason::Shutdown);
                break;
            }
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                session.close(CloseReason::Eof);
                break;
            }
            Ok(n) => {
                if let Err(e) = decoder.decode(&buf[..n], |packet| session.receive(packet)) {
                    session.close(CloseReason::Protocol(e));
                    break;
                }
            }
            Err(e) => {
                session.close(CloseReason::Io(e.to_string()));
                break;
            }
        }
    }
}

/// Drain the write channel onto the socket until the session closes.
async fn write_loop<W>(session: Session, mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let bytes = tokio::select! {
            biased;
            bytes = rx.recv() => bytes,
            _ = session.shared.cancel.cancelled() => break,
        };
        let Some(bytes) = bytes else {
            break;
        };
        let written = tokio::select! {
            written = writer.write_all(&bytes) => written,
            _ = session.shared.cancel.cancelled() => break,
        };
        if let Err(e) = written {
            session.close(CloseReason::Io(e.to_string()));
            break;
        }
        session
            .shared
            .backlog
            .fetch_sub(bytes.len(), Ordering::AcqRel);
    }
    let _ = writer.shutdown().await;
}
