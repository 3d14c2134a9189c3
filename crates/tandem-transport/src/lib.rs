//! Transport layer for Tandem.
//!
//! Provides the [`Transport`] and [`Connection`] traits over an ordered,
//! reliable byte stream, a TCP implementation, and the per-connection
//! reader/writer tasks that feed a single protocol loop:
//!
//! ```text
//! socket ──reader task──▶ mpsc<TransportEvent> ──▶ protocol loop
//! socket ◀──writer task── ConnectionHandle::send ◀──┘
//! ```
//!
//! The tasks only move bytes. Framing, encryption and every protocol
//! decision happen in the loop that owns the receiving end.

#![allow(async_fn_in_trait)]

mod error;
mod rendezvous;
mod tcp;
mod worker;

pub use error::TransportError;
pub use rendezvous::{NoRendezvous, Rendezvous, connect_with_fallback};
pub use tcp::{TcpConnection, TcpTransport};
pub use worker::{ConnectionHandle, TransportEvent, spawn_connection};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Address the transport listens on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A single connection carrying an ordered byte stream.
///
/// The futures are `Send` so [`spawn_connection`] can drive them from
/// spawned tasks.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Writes all of `data` to the peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Reads whatever bytes are available, without regard to frame
    /// boundaries.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Shuts down the write side.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display_has_prefix() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).into_inner(), 7);
    }

    #[test]
    fn test_connection_id_orders_by_accept_sequence() {
        let mut ids = vec![ConnectionId::new(3), ConnectionId::new(1), ConnectionId::new(2)];
        ids.sort();
        assert_eq!(ids, [1, 2, 3].map(ConnectionId::new));
    }
}
