//! `HostServer`: the host's protocol loop over TCP.
//!
//! One task owns the [`Host`] and multiplexes three sources with
//! `tokio::select!`: new connections, bytes from the per-connection reader
//! tasks, and the frame heartbeat. No state is shared across tasks.

use std::collections::HashMap;
use std::net::SocketAddr;

use tandem_clock::FrameTicker;
use tandem_protocol::ClientId;
use tandem_sync::Simulation;
use tandem_transport::{
    Connection, ConnectionHandle, ConnectionId, TcpConnection, TcpTransport, Transport,
    TransportEvent, spawn_connection,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{Host, HostEvent, TandemError};

/// A bound host, ready to run.
///
/// # Example
///
/// ```rust,ignore
/// let host = Host::new(config, AuthPolicy::default(), MySim::default(), catalog);
/// let server = HostServer::bind("0.0.0.0:3979", host).await?;
/// let host = server
///     .run(tokio::signal::ctrl_c().map(drop), |host, events| {
///         for event in events { /* ... */ }
///     })
///     .await?;
/// ```
pub struct HostServer<S: Simulation> {
    transport: TcpTransport,
    host: Host<S>,
    ticker: FrameTicker,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    clients: HashMap<ConnectionId, ClientId>,
    handles: HashMap<ClientId, ConnectionHandle>,
}

impl<S: Simulation> HostServer<S> {
    pub async fn bind(addr: &str, host: Host<S>) -> Result<Self, TandemError> {
        let transport = TcpTransport::bind(addr).await?;
        let ticker = FrameTicker::new(host.config().ticker());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            transport,
            host,
            ticker,
            events_tx,
            events_rx,
            clients: HashMap::new(),
            handles: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TandemError> {
        Ok(self.transport.local_addr()?)
    }

    pub fn host(&self) -> &Host<S> {
        &self.host
    }

    /// Runs the protocol loop until `shutdown` completes.
    ///
    /// `on_frame` is called after every host frame with the events raised
    /// since the previous one; it may submit commands or kick clients.
    /// Returns the host after telling every participant the session ended.
    pub async fn run<F>(
        mut self,
        shutdown: impl Future<Output = ()>,
        mut on_frame: F,
    ) -> Result<Host<S>, TandemError>
    where
        F: FnMut(&mut Host<S>, Vec<HostEvent>),
    {
        tokio::pin!(shutdown);
        info!(addr = ?self.transport.local_addr().ok(), "host running");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => self.admit(conn),
                    Err(e) => error!(error = %e, "accept failed"),
                },
                Some(event) = self.events_rx.recv() => self.on_transport_event(event),
                _ = self.ticker.wait_for_frame() => {
                    self.host.tick()?;
                    let events = self.host.drain_events();
                    on_frame(&mut self.host, events);
                    self.ticker.record_frame_end();
                }
            }
            self.flush();
        }

        self.host.shutdown();
        self.flush();
        let metrics = self.ticker.metrics();
        info!(
            frame = self.host.frame(),
            beats = metrics.total_beats,
            overruns = metrics.total_overruns,
            skipped = metrics.total_skipped,
            max_frame_ms = metrics.max_frame_time.as_secs_f64() * 1000.0,
            "host stopped"
        );
        Ok(self.host)
    }

    fn admit(&mut self, conn: TcpConnection) {
        let conn_id = conn.id();
        let peer = conn.peer_addr().map(|a| a.ip());
        match self.host.accept(peer) {
            Ok(client) => {
                let handle = spawn_connection(conn, self.events_tx.clone());
                self.clients.insert(conn_id, client);
                self.handles.insert(client, handle);
                debug!(%conn_id, client = %client, "connection admitted");
            }
            Err(rejection) => {
                // Events from this connection map to no client and are dropped.
                let handle = spawn_connection(conn, self.events_tx.clone());
                if let Err(e) = handle.send(rejection.bytes) {
                    debug!(%conn_id, error = %e, "rejection not sent");
                }
                info!(%conn_id, status = %rejection.status, "connection rejected");
                handle.close();
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let Some(&client) = self.clients.get(&event.id()) else {
            return;
        };
        match event {
            TransportEvent::Data { bytes, .. } => {
                let status = self.host.receive(client, &bytes);
                if status.is_terminal() {
                    debug!(client = %client, %status, "receive ended connection");
                }
            }
            TransportEvent::Closed { reason, .. } => {
                debug!(client = %client, ?reason, "connection closed by peer");
                self.host.connection_lost(client);
            }
        }
    }

    /// Hands queued bytes to the writer tasks and closes reaped
    /// connections.
    fn flush(&mut self) {
        for (client, bytes) in self.host.drain_outgoing() {
            let sent = self
                .handles
                .get(&client)
                .map(|handle| handle.send(bytes));
            if let Some(Err(e)) = sent {
                warn!(client = %client, error = %e, "send failed");
                self.host.connection_lost(client);
            }
        }
        for (client, bytes) in self.host.reap() {
            let Some(handle) = self.handles.remove(&client) else {
                continue;
            };
            self.clients.remove(&handle.id());
            if !bytes.is_empty() {
                if let Err(e) = handle.send(bytes) {
                    debug!(client = %client, error = %e, "final bytes not sent");
                }
            }
            handle.close();
        }
    }
}
