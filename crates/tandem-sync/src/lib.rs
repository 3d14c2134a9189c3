//! Lockstep synchronization for Tandem.
//!
//! Everything that keeps the simulation instances identical once a
//! participant is connected:
//!
//! - **Commands** ([`CommandQueue`], [`CommandDistributor`]): the host
//!   assigns every submitted command an execution frame and rebroadcasts
//!   it; each instance drains its queue by frame eligibility.
//! - **Desync detection** ([`DesyncDetector`]): compares the host's
//!   checksums with local ones at the same frame.
//! - **Snapshot transfer** ([`SnapshotSender`], [`SnapshotReceiver`],
//!   [`SnapshotScheduler`]): streams the world to joining participants,
//!   one transfer at a time.
//! - **Collaborators** ([`Simulation`], [`ContentCatalog`]): the traits
//!   the application implements.
//!
//! Nothing here does I/O. The host and participant loops in the `tandem`
//! crate own these pieces and decide when to call them.

mod desync;
mod distributor;
mod error;
mod queue;
mod simulation;
mod snapshot;

pub use desync::DesyncDetector;
pub use distributor::CommandDistributor;
pub use error::SyncError;
pub use queue::CommandQueue;
pub use simulation::{ContentCatalog, Simulation};
pub use snapshot::{
    DEFAULT_MAX_SNAPSHOT_SIZE, SnapshotReceiver, SnapshotScheduler, SnapshotSender, SnapshotSlot,
};

pub use tandem_protocol::CommandPacket;
