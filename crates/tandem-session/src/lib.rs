//! Participant sessions for Tandem.
//!
//! This crate covers everything between "a socket connected" and "this
//! participant may receive a snapshot":
//!
//! 1. **Connection state** ([`ConnectionState`], [`StateMachine`]): the
//!    join sequence as seen from the participant, with the legal
//!    transitions enforced in one place.
//! 2. **Handshake** ([`HostHandshake`], [`JoinerHandshake`]): X25519 key
//!    agreement, password or authorized-key authentication, and the
//!    per-direction session keys that switch frame encryption on.
//! 3. **Registry** ([`ClientRegistry`]): the host's record of who is
//!    connected, under which id, name and company.
//!
//! # How it fits in the stack
//!
//! ```text
//! tandem (Host / Participant)  ← drives the state machine and handshake
//!     ↕
//! Session Layer (this crate)   ← identity, authentication, join state
//!     ↕
//! Protocol Layer (below)       ← GameMessage, ClientId, FrameCipher
//! ```

mod auth;
mod error;
mod registry;
mod state;

pub use auth::{AuthPolicy, Credentials, HostHandshake, JoinerHandshake, SessionKeys};
pub use error::SessionError;
pub use registry::{ClientInfo, ClientRegistry};
pub use state::{ConnectionState, StateMachine};
