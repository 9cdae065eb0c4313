//! End-to-end tests: a real server on loopback, real clients.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use relay_switch::client::{ClientError, RelayClient};
use relay_switch::core::NameValidator;
use relay_switch::server::{RelayServer, RelayServerBuilder, ServerConfig};
use relay_switch::transport::Packet;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> ServerConfig {
    RelayServerBuilder::new()
        .host("127.0.0.1")
        .port(0)
        .name_validator(NameValidator::permissive())
        .opening_grace(Duration::from_millis(20))
        .auth_timeout(Duration::from_millis(300))
        .dump_packets(true)
        .build()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Connect a client and wait until the server has registered it.
async fn join(server: &RelayServer, name: &str) -> RelayClient {
    let before = server.registry().session_count();
    let client = RelayClient::connect(server.local_addr(), name).await.unwrap();
    wait_until(|| server.registry().session_count() > before).await;
    client
}

async fn recv(client: &mut RelayClient) -> Packet {
    tokio::time::timeout(WAIT, client.recv_packet())
        .await
        .expect("no packet in time")
        .unwrap()
}

/// Read until the server closes the connection.
async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 256];
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed");
}

#[tokio::test]
async fn test_ping_between_two_endpoints() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut red = join(&server, "red").await;
    let mut blue = join(&server, "blue").await;

    red.send_text("PING", "blue", "hello").await.unwrap();
    let packet = recv(&mut blue).await;
    assert_eq!(packet.kind(), "PING");
    assert_eq!(packet.remote(), "red");
    assert_eq!(packet.local(), "blue");
    assert_eq!(packet.data_as_text(), Some("hello"));

    blue.send_text("PING", "red", "hi").await.unwrap();
    let packet = recv(&mut red).await;
    assert_eq!(packet.remote(), "blue");
    assert_eq!(packet.local(), "red");
    assert_eq!(packet.data(), b"hi");

    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_payload_preserved() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut source = join(&server, "source").await;
    let mut sink = join(&server, "sink").await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    source.send_packet("DATA", "sink", payload.clone()).await.unwrap();
    let packet = recv(&mut sink).await;
    assert_eq!(packet.data(), payload.as_slice());

    server.shutdown().await;
}

#[tokio::test]
async fn test_forged_origin_rewritten() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut red = join(&server, "red").await;
    let mut blue = join(&server, "blue").await;

    let forged = Packet::new("DATA", "blue", "mallory", "x").unwrap();
    red.send(&forged).await.unwrap();
    assert_eq!(recv(&mut blue).await.remote(), "red");

    server.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_fan_out_skips_sender() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut cam1 = join(&server, "cam1").await;
    let mut cam2 = join(&server, "cam2").await;
    let mut cam3 = join(&server, "cam3").await;
    let mut hub = join(&server, "hub").await;

    cam1.send_text("DATA", "cam*", "sync").await.unwrap();
    for peer in [&mut cam2, &mut cam3] {
        let packet = recv(peer).await;
        assert_eq!(packet.remote(), "cam1");
        assert_eq!(packet.data_as_text(), Some("sync"));
    }

    // Ordering per connection: if cam1 had received its own broadcast it
    // would arrive before this marker. Same for hub, which did not match.
    hub.send_text("DATA", "cam1", "marker").await.unwrap();
    assert_eq!(recv(&mut cam1).await.data_as_text(), Some("marker"));
    cam2.send_text("DATA", "hub", "marker").await.unwrap();
    assert_eq!(recv(&mut hub).await.data_as_text(), Some("marker"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shared_name_receives_all_copies() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut first = join(&server, "screen").await;
    let mut second = join(&server, "screen").await;
    let mut sender = join(&server, "ctrl").await;
    assert_eq!(server.registry().len(), 2);

    sender.send_text("DATA", "screen", "frame").await.unwrap();
    assert_eq!(recv(&mut first).await.data_as_text(), Some("frame"));
    assert_eq!(recv(&mut second).await.data_as_text(), Some("frame"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_foreign_packets_dropped() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut red = join(&server, "red").await;
    let mut blue = join(&server, "blue").await;

    let foreign = Packet::builder("DATA")
        .remote("blue")
        .local("red")
        .data("looped")
        .foreign(true)
        .build()
        .unwrap();
    red.send(&foreign).await.unwrap();
    red.send_text("DATA", "blue", "direct").await.unwrap();

    let packet = recv(&mut blue).await;
    assert_eq!(packet.data_as_text(), Some("direct"));
    assert!(!packet.is_foreign());

    server.shutdown().await;
}

#[tokio::test]
async fn test_reauthentication_closes_connection() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut blue = join(&server, "blue").await;

    blue.send(&Packet::auth("blue").unwrap()).await.unwrap();
    let result = tokio::time::timeout(WAIT, blue.recv()).await.unwrap();
    assert!(matches!(result, Ok(None) | Err(ClientError::Io(_))));
    wait_until(|| !server.registry().contains("blue")).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_auth_timeout_closes_silent_connection() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    expect_closed(&mut stream).await;
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_name_mismatch_rejected() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    let forged = Packet::new("AUTH", "", "blue", "bleu").unwrap();
    stream.write_all(&forged.to_bytes()).await.unwrap();
    expect_closed(&mut stream).await;
    assert!(!server.registry().contains("blue"));
    assert!(!server.registry().contains("bleu"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_validator_rejects_name() {
    let config = RelayServerBuilder::new().host("127.0.0.1").port(0).build();
    let server = RelayServer::bind(config).await.unwrap();

    let result = RelayClient::connect(server.local_addr(), "red").await;
    assert!(matches!(
        result,
        Err(ClientError::HandshakeFailed(_) | ClientError::Io(_))
    ));
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_name_rejected_at_registration() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    // Handshake succeeds, registration at the end of the grace period fails.
    stream
        .write_all(&Packet::auth("cam*").unwrap().to_bytes())
        .await
        .unwrap();
    expect_closed(&mut stream).await;
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let server = RelayServer::bind(config()).await.unwrap();
    let blue = join(&server, "blue").await;
    assert!(server.registry().contains("blue"));

    blue.close().await.unwrap();
    wait_until(|| server.registry().is_empty()).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = RelayServer::bind(config()).await.unwrap();
    let mut blue = join(&server, "blue").await;
    let mut pending = TcpStream::connect(server.local_addr()).await.unwrap();

    server.shutdown().await;
    let result = tokio::time::timeout(WAIT, blue.recv()).await.unwrap();
    assert!(matches!(result, Ok(None) | Err(ClientError::Io(_))));
    expect_closed(&mut pending).await;
}
