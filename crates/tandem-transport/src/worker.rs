//! Per-connection reader and writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Connection, ConnectionId, TransportError};

/// What the reader tasks report to the protocol loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from the connection, in stream order.
    Data { id: ConnectionId, bytes: Vec<u8> },
    /// The peer closed the stream (`reason == None`) or reading failed.
    Closed {
        id: ConnectionId,
        reason: Option<String>,
    },
}

impl TransportEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Data { id, .. } | Self::Closed { id, .. } => *id,
        }
    }
}

/// The protocol loop's grip on one connection.
///
/// Dropping the handle stops the reader immediately; the writer flushes
/// what was already queued and then shuts the socket down.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queues bytes for the writer task.
    ///
    /// # Errors
    /// [`TransportError::Shutdown`] if the writer already stopped.
    pub fn send(&self, bytes: impl Into<Bytes>) -> Result<(), TransportError> {
        self.outbound
            .send(bytes.into())
            .map_err(|_| TransportError::Shutdown)
    }

    /// Stops reading and lets the writer drain and close.
    pub fn close(self) {
        tracing::debug!(id = %self.id, "closing connection");
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Spawns the reader and writer tasks for `conn`.
///
/// Every chunk read is forwarded to `events`; the stream's end is
/// reported once as [`TransportEvent::Closed`].
pub fn spawn_connection<C>(
    conn: C,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> ConnectionHandle
where
    C: Connection,
{
    let id = conn.id();
    let peer = conn.peer_addr();
    let conn = Arc::new(conn);

    let reader = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let reason = loop {
                match conn.recv().await {
                    Ok(Some(bytes)) => {
                        if events.send(TransportEvent::Data { id, bytes }).is_err() {
                            // Protocol loop is gone.
                            return;
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(e.to_string()),
                }
            };
            tracing::debug!(%id, ?reason, "reader finished");
            let _ = events.send(TransportEvent::Closed { id, reason });
        })
    };

    let (outbound, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = conn.send(&bytes).await {
                tracing::debug!(%id, error = %e, "writer stopped");
                return;
            }
        }
        if let Err(e) = conn.close().await {
            tracing::trace!(%id, error = %e, "shutdown after close failed");
        }
    });

    ConnectionHandle {
        id,
        peer,
        outbound,
        reader,
    }
}
