//! Relay server.
//!
//! Accepts TCP connections, runs a [`Session`] per connection and routes
//! packets between authenticated sessions through the [`Dispatcher`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::registry::NameRegistry;
use super::session::{CloseReason, Session, SessionConfig, SessionHandler};
use crate::core::constants::{
    AUTH_TIMEOUT, DEFAULT_HOST, DEFAULT_MAX_BACKLOG, DEFAULT_MAX_DATA_LENGTH, DEFAULT_PORT,
    KEEPALIVE_INTERVAL, OPENING_GRACE,
};
use crate::core::{Closable, NameValidator};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that can occur in the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to bind to. 0 picks an ephemeral port.
    pub port: u16,

    /// Names a connection may authenticate as.
    pub name_validator: NameValidator,

    /// TCP keep-alive idle time. `None` disables keep-alive.
    pub keepalive_interval: Option<Duration>,

    /// Set TCP_NODELAY on accepted connections.
    pub no_delay: bool,

    /// Log a summary of every routed packet at info level.
    pub dump_packets: bool,

    /// Handshake deadline.
    pub auth_timeout: Duration,

    /// Delay between handshake and open.
    pub opening_grace: Duration,

    /// Largest accepted payload.
    pub max_data_length: usize,

    /// Bytes queued for one peer before it is disconnected as too slow.
    pub max_backlog: usize,
}

impl ServerConfig {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auth_timeout: self.auth_timeout,
            opening_grace: self.opening_grace,
            name_validator: self.name_validator.clone(),
            max_data_length: self.max_data_length,
            max_backlog: self.max_backlog,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            name_validator: NameValidator::default(),
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            no_delay: true,
            dump_packets: false,
            auth_timeout: AUTH_TIMEOUT,
            opening_grace: OPENING_GRACE,
            max_data_length: DEFAULT_MAX_DATA_LENGTH,
            max_backlog: DEFAULT_MAX_BACKLOG,
        }
    }
}

/// Builder for a [`ServerConfig`].
#[derive(Debug)]
pub struct RelayServerBuilder {
    config: ServerConfig,
}

impl RelayServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the bind port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the name validator.
    pub fn name_validator(mut self, validator: NameValidator) -> Self {
        self.config.name_validator = validator;
        self
    }

    /// Set the keep-alive idle time, or `None` to disable keep-alive.
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.config.no_delay = enabled;
        self
    }

    /// Enable or disable the packet dump.
    pub fn dump_packets(mut self, enabled: bool) -> Self {
        self.config.dump_packets = enabled;
        self
    }

    /// Set the handshake deadline.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Set the opening grace period.
    pub fn opening_grace(mut self, grace: Duration) -> Self {
        self.config.opening_grace = grace;
        self
    }

    /// Set the largest accepted payload.
    pub fn max_data_length(mut self, max: usize) -> Self {
        self.config.max_data_length = max;
        self
    }

    /// Set the per-peer outbound backlog limit.
    pub fn max_backlog(mut self, max: usize) -> Self {
        self.config.max_backlog = max;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running relay server.
///
/// # Example
///
/// ```no_run
/// use relay_switch::server::{RelayServer, RelayServerBuilder};
///
/// # async fn run() -> Result<(), relay_switch::server::ServerError> {
/// let config = RelayServerBuilder::new().port(49501).build();
/// let server = RelayServer::bind(config).await?;
/// println!("listening on {}", server.local_addr());
///
/// tokio::signal::ctrl_c().await?;
/// server.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RelayServer {
    config: ServerConfig,
    local_addr: SocketAddr,
    registry: NameRegistry,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind the listener and start accepting connections.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| ServerError::BindFailed(format!("{}:{}: {e}", config.host, config.port)))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        let registry = NameRegistry::new();
        let cancel = CancellationToken::new();
        let dispatcher: Arc<dyn SessionHandler> =
            Arc::new(Dispatcher::new(registry.clone(), config.dump_packets));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            config.clone(),
            dispatcher,
            cancel.clone(),
        ));

        Ok(Self {
            config,
            local_addr,
            registry,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry of open sessions.
    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting, close every session and wait for the accept loop.
    pub async fn shutdown(mut self) {
        for session in self.registry.sessions() {
            session.close(CloseReason::Shutdown);
        }
        // Sessions still in the handshake are closed through their child tokens.
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        info!(local_addr = %self.local_addr, "server shut down");
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<dyn SessionHandler>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, address) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = configure_stream(&stream, &config) {
            warn!(session = %address, error = %e, "failed to configure socket");
        }
        Session::spawn(
            stream,
            address,
            config.session_config(),
            handler.clone(),
            &cancel,
        );
    }
    debug!("accept loop stopped");
}

fn configure_stream(stream: &TcpStream, config: &ServerConfig) -> io::Result<()> {
    stream.set_nodelay(config.no_delay)?;
    let socket = SockRef::from(stream);
    match config.keepalive_interval {
        Some(interval) => socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(interval)),
        None => socket.set_keepalive(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 49501);
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(10)));
        assert!(config.no_delay);
        assert!(!config.dump_packets);
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.opening_grace, Duration::from_millis(500));
        assert!(config.name_validator.validate("blue"));
        assert!(!config.name_validator.validate("red"));
    }

    #[test]
    fn test_builder() {
        let config = RelayServerBuilder::new()
            .host("127.0.0.1")
            .port(0)
            .keepalive_interval(None)
            .no_delay(false)
            .dump_packets(true)
            .auth_timeout(Duration::from_secs(1))
            .opening_grace(Duration::from_millis(10))
            .max_data_length(1024)
            .max_backlog(4096)
            .name_validator(NameValidator::permissive())
            .build();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.keepalive_interval, None);
        assert!(!config.no_delay);
        assert!(config.dump_packets);
        assert!(config.name_validator.validate("red"));

        let session = config.session_config();
        assert_eq!(session.auth_timeout, Duration::from_secs(1));
        assert_eq!(session.opening_grace, Duration::from_millis(10));
        assert_eq!(session.max_data_length, 1024);
        assert_eq!(session.max_backlog, 4096);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = RelayServerBuilder::new().host("127.0.0.1").port(0).build();
        let server = RelayServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.session_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = RelayServer::bind(RelayServerBuilder::new().host("127.0.0.1").port(0).build())
            .await
            .unwrap();
        let taken = first.local_addr().port();
        let result =
            RelayServer::bind(RelayServerBuilder::new().host("127.0.0.1").port(taken).build())
                .await;
        assert!(matches!(result, Err(ServerError::BindFailed(_))));
        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_configure_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        configure_stream(&server_side, &ServerConfig::default()).unwrap();
        assert!(server_side.nodelay().unwrap());
        assert!(SockRef::from(&server_side).keepalive().unwrap());

        let config = RelayServerBuilder::new()
            .keepalive_interval(None)
            .no_delay(false)
            .build();
        configure_stream(&server_side, &config).unwrap();
        assert!(!server_side.nodelay().unwrap());
        assert!(!SockRef::from(&server_side).keepalive().unwrap());
        drop(client);
    }
}
