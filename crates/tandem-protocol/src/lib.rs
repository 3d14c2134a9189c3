//! Wire protocol for Tandem.
//!
//! This crate defines the bytes that travel between the host and its
//! participants:
//!
//! - **Framing** ([`Framer`]): `[u32 LE length][body]` frames over an
//!   ordered byte stream, with optional per-direction authenticated
//!   encryption of the body ([`FrameCipher`]).
//! - **Packets** ([`Packet`], [`PacketReader`]): positional writers and
//!   fail-fast readers for fixed-width integers, strings and buffers.
//! - **Messages** ([`GameMessage`]): the full message set as one tagged
//!   union keyed by [`PacketType`].
//! - **Shared types** ([`ClientId`], [`CompanyId`], [`Checksum`],
//!   [`CommandPacket`], [`RecvStatus`], [`ErrorCode`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Framer (frames) → GameMessage → Host / Participant
//! ```
//!
//! Nothing here knows about connection state; deciding whether a message
//! is legal right now is the job of whoever receives it.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod cipher;
mod command;
mod error;
mod framer;
mod message;
mod packet;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use cipher::{FrameCipher, NONCE_BASE_LEN, TAG_LEN};
pub use command::CommandPacket;
pub use error::ProtocolError;
pub use framer::{DEFAULT_MAX_FRAME_SIZE, Framer, HEADER_LEN};
pub use message::{
    AUTH_NONCE_LEN, AuthMethod, CONTENT_CHECKSUM_LEN, ContentEntry, GameMessage, PUBLIC_KEY_LEN,
};
pub use packet::{CoordinatorPacketType, Packet, PacketReader, PacketTag, PacketType};
pub use types::{CallbackKind, Checksum, ClientId, CompanyId, Direction, ErrorCode, RecvStatus};
