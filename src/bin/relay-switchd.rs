//! relay-switchd: standalone relay server.
//!
//! ```text
//! relay-switchd --port 49501 --dump-packets
//! RUST_LOG=relay_switch=debug relay-switchd
//! ```

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_switch::core::constants::{
    AUTH_TIMEOUT, DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_MAX_BACKLOG, DEFAULT_MAX_DATA_LENGTH,
    DEFAULT_PORT, KEEPALIVE_INTERVAL,
};
use relay_switch::server::{RelayServer, RelayServerBuilder, ServerError};

#[derive(Debug, Parser)]
#[command(name = "relay-switchd", version, about = "Named-endpoint TCP relay server")]
struct Args {
    /// Host to bind to.
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind to.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// TCP keep-alive idle time in seconds; 0 disables keep-alive.
    #[arg(long, default_value_t = KEEPALIVE_INTERVAL.as_secs())]
    keepalive_secs: u64,

    /// Set TCP_NODELAY on accepted connections.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    no_delay: bool,

    /// Log every routed packet at info level.
    #[arg(long, env = "LOG_PACKETS")]
    dump_packets: bool,

    /// Handshake deadline in milliseconds.
    #[arg(long, default_value_t = AUTH_TIMEOUT.as_millis() as u64)]
    auth_timeout_ms: u64,

    /// Largest accepted payload in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_DATA_LENGTH)]
    max_data_length: usize,

    /// Bytes queued for one peer before it is disconnected as too slow.
    #[arg(long, default_value_t = DEFAULT_MAX_BACKLOG)]
    max_backlog: usize,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let keepalive = (args.keepalive_secs > 0).then(|| Duration::from_secs(args.keepalive_secs));

    let config = RelayServerBuilder::new()
        .host(args.host)
        .port(args.port)
        .keepalive_interval(keepalive)
        .no_delay(args.no_delay)
        .dump_packets(args.dump_packets)
        .auth_timeout(Duration::from_millis(args.auth_timeout_ms))
        .max_data_length(args.max_data_length)
        .max_backlog(args.max_backlog)
        .build();

    let server = RelayServer::bind(config).await?;
    info!(local_addr = %server.local_addr(), "relay-switchd started");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    server.shutdown().await;
    Ok(())
}
