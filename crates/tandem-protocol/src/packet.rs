//! Packet tags, the field writer, and the fail-fast field reader.
//!
//! A packet body is `[u8 tag][fields...]`. The length header is not part
//! of the body; the [`Framer`](crate::Framer) adds and strips it.
//!
//! Field encoding is fixed:
//! - integers are little-endian, 8/16/32/64 bits wide
//! - strings are a `u16` byte length followed by UTF-8
//! - buffers are a `u16` (or `u32`) byte length followed by the bytes
//! - fixed-size arrays (keys, nonces, checksums) are written raw

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Tag enumerations
// ---------------------------------------------------------------------------

/// A one-byte packet type enumeration ending in a `Count` sentinel.
pub trait PacketTag: Copy + Sized {
    /// Maps a wire byte to a tag. The sentinel and anything past it map
    /// to `None`.
    fn from_tag(tag: u8) -> Option<Self>;

    fn as_tag(self) -> u8;
}

macro_rules! packet_tags {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant,)+
            /// Number of valid tags. Never valid on the wire.
            Count,
        }

        impl $name {
            /// Every valid tag, in wire order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];
        }

        impl PacketTag for $name {
            fn from_tag(tag: u8) -> Option<Self> {
                Self::ALL.get(tag as usize).copied()
            }

            fn as_tag(self) -> u8 {
                self as u8
            }
        }
    };
}

packet_tags! {
    /// Message types of the game-session protocol, in wire order.
    ///
    /// `Server*` messages travel host → participant, `Client*` messages
    /// participant → host.
    PacketType {
        ServerFull,
        ServerBanned,
        ClientJoin,
        ServerError,
        ServerShutdown,
        ServerAuthRequest,
        ClientAuthResponse,
        ServerEnableEncryption,
        ClientIdentify,
        ServerCheckContent,
        ClientContentChecked,
        ServerWelcome,
        ServerClientInfo,
        ClientGetSnapshot,
        ServerWaitForSnapshot,
        ServerSnapshotBegin,
        ServerSnapshotSize,
        ServerSnapshotData,
        ServerSnapshotDone,
        ClientSnapshotOk,
        ServerClientJoined,
        ServerFrame,
        ClientAck,
        ServerSync,
        ClientCommand,
        ServerCommand,
        ServerCommandRejected,
        ClientChat,
        ServerChat,
        ClientQuit,
        ServerQuit,
        ClientError,
        ServerErrorQuit,
    }
}

packet_tags! {
    /// Message types of the rendezvous/relay protocol.
    ///
    /// Disjoint from [`PacketType`]: the two never share a connection.
    CoordinatorPacketType {
        CoordinatorError,
        ServerRegister,
        CoordinatorRegisterAck,
        ServerUpdate,
        ClientListing,
        CoordinatorListing,
        ClientConnect,
        CoordinatorConnecting,
        ServerOrClientConnectFailed,
        CoordinatorConnectFailed,
        ClientConnected,
        CoordinatorDirectConnect,
        CoordinatorStunRequest,
        ServerOrClientStunResult,
        CoordinatorStunConnect,
        CoordinatorContentLookup,
        CoordinatorTurnConnect,
    }
}

// ---------------------------------------------------------------------------
// Packet (writer)
// ---------------------------------------------------------------------------

/// An outgoing packet body: the tag followed by fields in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    body: Vec<u8>,
}

impl Packet {
    pub fn new(tag: impl PacketTag) -> Self {
        Self {
            body: vec![tag.as_tag()],
        }
    }

    pub fn tag(&self) -> u8 {
        self.body[0]
    }

    /// Body length including the tag byte.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Always `false`; a packet holds at least its tag.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.body.push(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes raw bytes with no length prefix (fixed-size fields).
    pub fn put_array(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self
    }

    /// Writes a `u16` length followed by the bytes.
    pub fn put_buffer(&mut self, bytes: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| ProtocolError::FieldTooLong(bytes.len()))?;
        self.put_u16(len);
        Ok(self.put_array(bytes))
    }

    /// Writes a `u32` length followed by the bytes.
    pub fn put_long_buffer(&mut self, bytes: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| ProtocolError::FieldTooLong(bytes.len()))?;
        self.put_u32(len);
        Ok(self.put_array(bytes))
    }

    /// Writes a `u16` byte length followed by UTF-8.
    pub fn put_str(&mut self, value: &str) -> Result<&mut Self, ProtocolError> {
        self.put_buffer(value.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// PacketReader
// ---------------------------------------------------------------------------

/// Positional reader over one received packet body.
///
/// Every read checks the remaining length first and fails with
/// [`ProtocolError::Truncated`] instead of reading past the frame.
#[derive(Debug)]
pub struct PacketReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    /// Reads and validates the tag byte against an enumeration.
    pub fn tag<T: PacketTag>(&mut self) -> Result<T, ProtocolError> {
        let raw = self.u8()?;
        T::from_tag(raw).ok_or(ProtocolError::UnknownTag(raw))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.body[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProtocolError::InvalidField("bool")),
        }
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn buffer(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn long_buffer(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidField("utf-8 string"))
    }

    /// Fails if any bytes remain unread.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_count_is_not_a_wire_tag() {
        let count = PacketType::Count as u8;
        assert_eq!(count as usize, PacketType::ALL.len());
        assert_eq!(PacketType::from_tag(count), None);
        assert_eq!(PacketType::from_tag(u8::MAX), None);
    }

    #[test]
    fn test_packet_type_from_tag_matches_discriminant() {
        for &tag in PacketType::ALL {
            assert_eq!(PacketType::from_tag(tag.as_tag()), Some(tag));
        }
    }

    #[test]
    fn test_coordinator_count_is_not_a_wire_tag() {
        let count = CoordinatorPacketType::Count as u8;
        assert_eq!(CoordinatorPacketType::from_tag(count), None);
        assert_eq!(
            CoordinatorPacketType::from_tag(0),
            Some(CoordinatorPacketType::CoordinatorError)
        );
    }

    #[test]
    fn test_packet_writes_little_endian() {
        let mut p = Packet::new(PacketType::ServerFrame);
        p.put_u16(0x0102).put_u32(0x0304_0506);
        assert_eq!(
            p.as_bytes(),
            &[PacketType::ServerFrame as u8, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03]
        );
    }

    #[test]
    fn test_packet_put_buffer_too_long_fails() {
        let mut p = Packet::new(PacketType::ServerSnapshotData);
        let big = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            p.put_buffer(&big),
            Err(ProtocolError::FieldTooLong(_))
        ));
    }

    #[test]
    fn test_reader_reads_fields_in_order() {
        let mut p = Packet::new(PacketType::ServerChat);
        p.put_u32(7).put_str("hello").unwrap().put_u64(u64::MAX);
        let mut r = PacketReader::new(p.as_bytes());
        assert_eq!(r.tag::<PacketType>().unwrap(), PacketType::ServerChat);
        assert_eq!(r.u32().unwrap(), 7);
        assert_eq!(r.string().unwrap(), "hello");
        assert_eq!(r.u64().unwrap(), u64::MAX);
        r.finish().unwrap();
    }

    #[test]
    fn test_reader_truncated_field_fails_fast() {
        let body = [PacketType::ServerSync as u8, 0x01, 0x02];
        let mut r = PacketReader::new(&body);
        r.tag::<PacketType>().unwrap();
        let err = r.u32().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 4,
                remaining: 2
            }
        ));
    }

    #[test]
    fn test_reader_buffer_length_past_end_fails() {
        // Declares 100 bytes, carries 2.
        let body = [100u8, 0, 0xAA, 0xBB];
        let mut r = PacketReader::new(&body);
        assert!(matches!(r.buffer(), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_reader_unknown_tag_fails() {
        let body = [PacketType::Count as u8];
        let mut r = PacketReader::new(&body);
        assert!(matches!(
            r.tag::<PacketType>(),
            Err(ProtocolError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_reader_invalid_utf8_fails() {
        let body = [2u8, 0, 0xFF, 0xFE];
        let mut r = PacketReader::new(&body);
        assert!(matches!(r.string(), Err(ProtocolError::InvalidField(_))));
    }

    #[test]
    fn test_reader_finish_with_trailing_bytes_fails() {
        let body = [1u8, 2, 3];
        let mut r = PacketReader::new(&body);
        r.u8().unwrap();
        assert!(matches!(r.finish(), Err(ProtocolError::TrailingBytes(2))));
    }
}
