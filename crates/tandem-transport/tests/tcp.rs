//! Integration tests for the TCP transport.
//!
//! These spin up a real listener on an OS-assigned port and push bytes
//! through the reader/writer tasks.

use std::net::SocketAddr;

use tandem_transport::{
    Connection, NoRendezvous, Rendezvous, TcpConnection, TcpTransport, Transport,
    TransportError, TransportEvent, connect_with_fallback, spawn_connection,
};
use tokio::sync::mpsc;

async fn listener() -> (TcpTransport, SocketAddr) {
    let transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
    let addr = transport.local_addr().expect("bound address");
    (transport, addr)
}

/// Reads events for `id` until `want` bytes have arrived.
async fn collect(rx: &mut mpsc::UnboundedReceiver<TransportEvent>, want: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < want {
        match rx.recv().await.expect("event") {
            TransportEvent::Data { bytes, .. } => out.extend(bytes),
            TransportEvent::Closed { reason, .. } => panic!("closed early: {reason:?}"),
        }
    }
    out
}

#[tokio::test]
async fn test_tcp_accept_and_exchange_both_directions() {
    let (mut transport, addr) = listener().await;
    let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpConnection::connect(addr).await.expect("should connect");
    let server = server.await.expect("accept task");
    assert!(server.id().into_inner() > 0);
    assert!(server.peer_addr().is_some());

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let server = spawn_connection(server, server_tx);
    let client = spawn_connection(client, client_tx);

    server.send(b"hello from host".to_vec()).unwrap();
    client.send(b"hello from joiner".to_vec()).unwrap();

    assert_eq!(collect(&mut client_rx, 15).await, b"hello from host");
    assert_eq!(collect(&mut server_rx, 17).await, b"hello from joiner");
}

#[tokio::test]
async fn test_peer_close_reports_closed_event() {
    let (mut transport, addr) = listener().await;
    let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpConnection::connect(addr).await.expect("should connect");
    let server = server.await.expect("accept task");

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let server = spawn_connection(server, server_tx);

    client.send(b"bye").await.unwrap();
    client.close().await.unwrap();

    assert_eq!(collect(&mut server_rx, 3).await, b"bye");
    match server_rx.recv().await.expect("event") {
        TransportEvent::Closed { id, reason } => {
            assert_eq!(id, server.id());
            assert_eq!(reason, None);
        }
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_writer_flushes_before_close() {
    let (mut transport, addr) = listener().await;
    let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpConnection::connect(addr).await.expect("should connect");
    let server = server.await.expect("accept task");

    let (server_tx, _server_rx) = mpsc::unbounded_channel();
    let server = spawn_connection(server, server_tx);
    server.send(vec![9u8; 64 * 1024]).unwrap();
    server.close();

    let mut received = 0;
    while let Some(bytes) = client.recv().await.unwrap() {
        received += bytes.len();
    }
    assert_eq!(received, 64 * 1024);
}

// =========================================================================
// Rendezvous fallback
// =========================================================================

struct FixedRendezvous(SocketAddr);

impl Rendezvous for FixedRendezvous {
    async fn resolve(&self, _target: &str) -> Result<SocketAddr, TransportError> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn test_fallback_unused_when_direct_connect_works() {
    let (_transport, addr) = listener().await;
    let conn = connect_with_fallback(&addr.to_string(), &NoRendezvous).await;
    assert!(conn.is_ok());
}

#[tokio::test]
async fn test_fallback_resolves_unreachable_target() {
    let (mut transport, addr) = listener().await;
    let accept = tokio::spawn(async move { transport.accept().await.is_ok() });
    let conn = connect_with_fallback("invalid host name:1", &FixedRendezvous(addr)).await;
    assert!(conn.is_ok());
    assert!(accept.await.unwrap());
}

#[tokio::test]
async fn test_fallback_without_rendezvous_fails() {
    let err = connect_with_fallback("invalid host name:1", &NoRendezvous)
        .await
        .err()
        .expect("should fail");
    assert!(matches!(err, TransportError::ConnectFailed { .. }));
}
