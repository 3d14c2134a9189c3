//! # Tandem
//!
//! Deterministic lockstep multiplayer sessions.
//!
//! Every instance runs the same deterministic [`Simulation`]. Only
//! commands travel over the network: the host stamps each one with the
//! frame it will execute at, every instance applies it at exactly that
//! frame, and periodic checksums prove the copies stayed identical.
//!
//! ## Layers
//!
//! ```text
//! HostServer / ParticipantClient   tokio loops over TCP (this crate)
//! Host / Participant               sans-IO protocol state (this crate)
//! tandem-sync                      queue, distributor, desync, snapshots
//! tandem-session                   join state, handshake, client registry
//! tandem-clock                     frame counters and heartbeat
//! tandem-protocol                  framing, encryption, messages
//! tandem-transport                 TCP, connection tasks, rendezvous
//! ```
//!
//! [`Host`] and [`Participant`] never touch a socket, so whole sessions can
//! be driven in memory by shuttling their `drain_outgoing()` bytes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::prelude::*;
//!
//! // Implement Simulation for your game state, then:
//! // let host = Host::new(NetworkConfig::default(), AuthPolicy::default(), sim, catalog);
//! // let server = HostServer::bind("0.0.0.0:3979", host).await?;
//! // server.run(shutdown, |host, events| { /* ... */ }).await?;
//! ```

mod client;
mod config;
mod error;
mod host;
mod logging;
mod participant;
mod remote;
mod server;

pub use client::ParticipantClient;
pub use config::NetworkConfig;
pub use error::TandemError;
pub use host::{HOST_COMPANY, Host, HostEvent, Rejection};
pub use logging::init_logging;
pub use participant::{Participant, ParticipantEvent};
pub use remote::RemoteStatus;
pub use server::HostServer;

pub use tandem_protocol::{
    CallbackKind, Checksum, ClientId, CommandPacket, CompanyId, ContentEntry, ErrorCode,
    RecvStatus,
};
pub use tandem_session::{AuthPolicy, ConnectionState, Credentials};
pub use tandem_sync::{ContentCatalog, Simulation};
pub use tandem_transport::{NoRendezvous, Rendezvous};

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::{
        AuthPolicy, Checksum, ClientId, CommandPacket, CompanyId, ConnectionState,
        ContentCatalog, ContentEntry, Credentials, Host, HostEvent, HostServer, NetworkConfig,
        NoRendezvous, Participant, ParticipantClient, ParticipantEvent, RecvStatus, Simulation,
        TandemError, init_logging,
    };
}
