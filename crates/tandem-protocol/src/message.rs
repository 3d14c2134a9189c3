//! The game-session message set as one tagged union.
//!
//! Each variant maps to exactly one [`PacketType`]. Decoding validates the
//! tag, reads every field with the fail-fast reader, and rejects trailing
//! bytes, so a successfully decoded message is field-for-field what the
//! sender encoded.
//!
//! Handlers `match` on [`GameMessage`] exhaustively; whatever arm is not
//! valid for a role (a `Client*` message arriving at a participant, say)
//! falls through to that role's "invalid here" arm.

use crate::{
    Checksum, ClientId, CommandPacket, CompanyId, Direction, ErrorCode, Packet, PacketReader,
    PacketType, ProtocolError,
};

/// Length of the server's X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Length of the key-derivation nonce in `ServerAuthRequest`.
pub const AUTH_NONCE_LEN: usize = 24;
/// Length of a content checksum.
pub const CONTENT_CHECKSUM_LEN: usize = 16;

/// Authentication methods a host may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthMethod {
    /// Anonymous key exchange; provides encryption only.
    KeyExchangeOnly = 0,
    /// Key exchange with the game password mixed into key derivation.
    Password = 1,
    /// Key exchange plus a signature from a key on the host's allow list.
    AuthorizedKey = 2,
}

impl AuthMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::KeyExchangeOnly),
            1 => Some(Self::Password),
            2 => Some(Self::AuthorizedKey),
            _ => None,
        }
    }
}

/// One piece of content the host requires, identified by id and checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentEntry {
    pub id: u32,
    pub checksum: [u8; CONTENT_CHECKSUM_LEN],
}

/// Every message of the game-session protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameMessage {
    ServerFull,
    ServerBanned,
    ClientJoin {
        revision: String,
    },
    ServerError {
        code: ErrorCode,
        detail: String,
    },
    ServerShutdown,
    ServerAuthRequest {
        method: AuthMethod,
        server_public_key: [u8; PUBLIC_KEY_LEN],
        nonce: [u8; AUTH_NONCE_LEN],
    },
    ClientAuthResponse {
        public_key: [u8; PUBLIC_KEY_LEN],
        /// Key-confirmation MAC proving both sides derived the same keys.
        proof: Vec<u8>,
        /// Long-term identity key; empty unless the method is `AuthorizedKey`.
        identity_key: Vec<u8>,
        /// Signature by `identity_key` over the handshake transcript.
        signature: Vec<u8>,
    },
    ServerEnableEncryption {
        nonce_base: [u8; crate::cipher::NONCE_BASE_LEN],
    },
    ClientIdentify {
        name: String,
        company: CompanyId,
    },
    ServerCheckContent {
        content: Vec<ContentEntry>,
    },
    ClientContentChecked,
    ServerWelcome {
        client_id: ClientId,
    },
    ServerClientInfo {
        client_id: ClientId,
        company: CompanyId,
        name: String,
    },
    ClientGetSnapshot,
    ServerWaitForSnapshot {
        position: u16,
    },
    ServerSnapshotBegin {
        frame: u32,
    },
    ServerSnapshotSize {
        total: u32,
    },
    ServerSnapshotData {
        chunk: Vec<u8>,
    },
    ServerSnapshotDone,
    ClientSnapshotOk,
    ServerClientJoined {
        client_id: ClientId,
    },
    ServerFrame {
        frame: u32,
        frame_max: u32,
        /// Liveness token to echo back in `ClientAck`, when present.
        /// Sent as a `u8` with 0 meaning none, so `Some(0)` reads back as
        /// `None`.
        token: Option<u8>,
    },
    ClientAck {
        frame: u32,
        token: u8,
    },
    ServerSync {
        frame: u32,
        checksum: Checksum,
    },
    ClientCommand(CommandPacket),
    ServerCommand(CommandPacket),
    ServerCommandRejected {
        cmd: u16,
        code: ErrorCode,
    },
    ClientChat {
        message: String,
    },
    ServerChat {
        client_id: ClientId,
        message: String,
    },
    ClientQuit,
    ServerQuit {
        client_id: ClientId,
    },
    ClientError {
        code: ErrorCode,
    },
    ServerErrorQuit {
        client_id: ClientId,
        code: ErrorCode,
    },
}

impl GameMessage {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::ServerFull => PacketType::ServerFull,
            Self::ServerBanned => PacketType::ServerBanned,
            Self::ClientJoin { .. } => PacketType::ClientJoin,
            Self::ServerError { .. } => PacketType::ServerError,
            Self::ServerShutdown => PacketType::ServerShutdown,
            Self::ServerAuthRequest { .. } => PacketType::ServerAuthRequest,
            Self::ClientAuthResponse { .. } => PacketType::ClientAuthResponse,
            Self::ServerEnableEncryption { .. } => PacketType::ServerEnableEncryption,
            Self::ClientIdentify { .. } => PacketType::ClientIdentify,
            Self::ServerCheckContent { .. } => PacketType::ServerCheckContent,
            Self::ClientContentChecked => PacketType::ClientContentChecked,
            Self::ServerWelcome { .. } => PacketType::ServerWelcome,
            Self::ServerClientInfo { .. } => PacketType::ServerClientInfo,
            Self::ClientGetSnapshot => PacketType::ClientGetSnapshot,
            Self::ServerWaitForSnapshot { .. } => PacketType::ServerWaitForSnapshot,
            Self::ServerSnapshotBegin { .. } => PacketType::ServerSnapshotBegin,
            Self::ServerSnapshotSize { .. } => PacketType::ServerSnapshotSize,
            Self::ServerSnapshotData { .. } => PacketType::ServerSnapshotData,
            Self::ServerSnapshotDone => PacketType::ServerSnapshotDone,
            Self::ClientSnapshotOk => PacketType::ClientSnapshotOk,
            Self::ServerClientJoined { .. } => PacketType::ServerClientJoined,
            Self::ServerFrame { .. } => PacketType::ServerFrame,
            Self::ClientAck { .. } => PacketType::ClientAck,
            Self::ServerSync { .. } => PacketType::ServerSync,
            Self::ClientCommand(_) => PacketType::ClientCommand,
            Self::ServerCommand(_) => PacketType::ServerCommand,
            Self::ServerCommandRejected { .. } => PacketType::ServerCommandRejected,
            Self::ClientChat { .. } => PacketType::ClientChat,
            Self::ServerChat { .. } => PacketType::ServerChat,
            Self::ClientQuit => PacketType::ClientQuit,
            Self::ServerQuit { .. } => PacketType::ServerQuit,
            Self::ClientError { .. } => PacketType::ClientError,
            Self::ServerErrorQuit { .. } => PacketType::ServerErrorQuit,
        }
    }

    /// Which role this message is addressed to.
    pub fn direction(&self) -> Direction {
        match self {
            Self::ClientJoin { .. }
            | Self::ClientAuthResponse { .. }
            | Self::ClientIdentify { .. }
            | Self::ClientContentChecked
            | Self::ClientGetSnapshot
            | Self::ClientSnapshotOk
            | Self::ClientAck { .. }
            | Self::ClientCommand(_)
            | Self::ClientChat { .. }
            | Self::ClientQuit
            | Self::ClientError { .. } => Direction::ToHost,
            _ => Direction::ToParticipant,
        }
    }

    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let mut p = Packet::new(self.packet_type());
        match self {
            Self::ServerFull
            | Self::ServerBanned
            | Self::ServerShutdown
            | Self::ClientContentChecked
            | Self::ClientGetSnapshot
            | Self::ServerSnapshotDone
            | Self::ClientSnapshotOk
            | Self::ClientQuit => {}
            Self::ClientJoin { revision } => {
                p.put_str(revision)?;
            }
            Self::ServerError { code, detail } => {
                p.put_u8(code.as_u8()).put_str(detail)?;
            }
            Self::ServerAuthRequest {
                method,
                server_public_key,
                nonce,
            } => {
                p.put_u8(*method as u8)
                    .put_array(server_public_key)
                    .put_array(nonce);
            }
            Self::ClientAuthResponse {
                public_key,
                proof,
                identity_key,
                signature,
            } => {
                p.put_array(public_key)
                    .put_buffer(proof)?
                    .put_buffer(identity_key)?
                    .put_buffer(signature)?;
            }
            Self::ServerEnableEncryption { nonce_base } => {
                p.put_array(nonce_base);
            }
            Self::ClientIdentify { name, company } => {
                p.put_str(name)?.put_u8(company.0);
            }
            Self::ServerCheckContent { content } => {
                let count = u8::try_from(content.len())
                    .map_err(|_| ProtocolError::FieldTooLong(content.len()))?;
                p.put_u8(count);
                for entry in content {
                    p.put_u32(entry.id).put_array(&entry.checksum);
                }
            }
            Self::ServerWelcome { client_id }
            | Self::ServerClientJoined { client_id }
            | Self::ServerQuit { client_id } => {
                p.put_u32(client_id.0);
            }
            Self::ServerClientInfo {
                client_id,
                company,
                name,
            } => {
                p.put_u32(client_id.0).put_u8(company.0).put_str(name)?;
            }
            Self::ServerWaitForSnapshot { position } => {
                p.put_u16(*position);
            }
            Self::ServerSnapshotBegin { frame } => {
                p.put_u32(*frame);
            }
            Self::ServerSnapshotSize { total } => {
                p.put_u32(*total);
            }
            Self::ServerSnapshotData { chunk } => {
                p.put_buffer(chunk)?;
            }
            Self::ServerFrame {
                frame,
                frame_max,
                token,
            } => {
                p.put_u32(*frame)
                    .put_u32(*frame_max)
                    .put_u8(token.unwrap_or(0));
            }
            Self::ClientAck { frame, token } => {
                p.put_u32(*frame).put_u8(*token);
            }
            Self::ServerSync { frame, checksum } => {
                p.put_u32(*frame).put_u32(checksum.0).put_u32(checksum.1);
            }
            Self::ClientCommand(cmd) | Self::ServerCommand(cmd) => {
                cmd.write(&mut p)?;
            }
            Self::ServerCommandRejected { cmd, code } => {
                p.put_u16(*cmd).put_u8(code.as_u8());
            }
            Self::ClientChat { message } => {
                p.put_str(message)?;
            }
            Self::ServerChat { client_id, message } => {
                p.put_u32(client_id.0).put_str(message)?;
            }
            Self::ClientError { code } => {
                p.put_u8(code.as_u8());
            }
            Self::ServerErrorQuit { client_id, code } => {
                p.put_u32(client_id.0).put_u8(code.as_u8());
            }
        }
        Ok(p)
    }

    /// Decodes one plaintext frame body (`[tag][fields]`).
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(body);
        let msg = match r.tag::<PacketType>()? {
            PacketType::ServerFull => Self::ServerFull,
            PacketType::ServerBanned => Self::ServerBanned,
            PacketType::ClientJoin => Self::ClientJoin {
                revision: r.string()?,
            },
            PacketType::ServerError => Self::ServerError {
                code: ErrorCode::from_u8(r.u8()?),
                detail: r.string()?,
            },
            PacketType::ServerShutdown => Self::ServerShutdown,
            PacketType::ServerAuthRequest => Self::ServerAuthRequest {
                method: AuthMethod::from_u8(r.u8()?)
                    .ok_or(ProtocolError::InvalidField("auth method"))?,
                server_public_key: r.array()?,
                nonce: r.array()?,
            },
            PacketType::ClientAuthResponse => Self::ClientAuthResponse {
                public_key: r.array()?,
                proof: r.buffer()?,
                identity_key: r.buffer()?,
                signature: r.buffer()?,
            },
            PacketType::ServerEnableEncryption => Self::ServerEnableEncryption {
                nonce_base: r.array()?,
            },
            PacketType::ClientIdentify => Self::ClientIdentify {
                name: r.string()?,
                company: CompanyId(r.u8()?),
            },
            PacketType::ServerCheckContent => {
                let count = r.u8()?;
                let mut content = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    content.push(ContentEntry {
                        id: r.u32()?,
                        checksum: r.array()?,
                    });
                }
                Self::ServerCheckContent { content }
            }
            PacketType::ClientContentChecked => Self::ClientContentChecked,
            PacketType::ServerWelcome => Self::ServerWelcome {
                client_id: ClientId(r.u32()?),
            },
            PacketType::ServerClientInfo => Self::ServerClientInfo {
                client_id: ClientId(r.u32()?),
                company: CompanyId(r.u8()?),
                name: r.string()?,
            },
            PacketType::ClientGetSnapshot => Self::ClientGetSnapshot,
            PacketType::ServerWaitForSnapshot => Self::ServerWaitForSnapshot {
                position: r.u16()?,
            },
            PacketType::ServerSnapshotBegin => Self::ServerSnapshotBegin { frame: r.u32()? },
            PacketType::ServerSnapshotSize => Self::ServerSnapshotSize { total: r.u32()? },
            PacketType::ServerSnapshotData => Self::ServerSnapshotData { chunk: r.buffer()? },
            PacketType::ServerSnapshotDone => Self::ServerSnapshotDone,
            PacketType::ClientSnapshotOk => Self::ClientSnapshotOk,
            PacketType::ServerClientJoined => Self::ServerClientJoined {
                client_id: ClientId(r.u32()?),
            },
            PacketType::ServerFrame => {
                let frame = r.u32()?;
                let frame_max = r.u32()?;
                let token = match r.u8()? {
                    0 => None,
                    token => Some(token),
                };
                Self::ServerFrame {
                    frame,
                    frame_max,
                    token,
                }
            }
            PacketType::ClientAck => Self::ClientAck {
                frame: r.u32()?,
                token: r.u8()?,
            },
            PacketType::ServerSync => Self::ServerSync {
                frame: r.u32()?,
                checksum: Checksum(r.u32()?, r.u32()?),
            },
            PacketType::ClientCommand => Self::ClientCommand(CommandPacket::read(&mut r)?),
            PacketType::ServerCommand => Self::ServerCommand(CommandPacket::read(&mut r)?),
            PacketType::ServerCommandRejected => Self::ServerCommandRejected {
                cmd: r.u16()?,
                code: ErrorCode::from_u8(r.u8()?),
            },
            PacketType::ClientChat => Self::ClientChat {
                message: r.string()?,
            },
            PacketType::ServerChat => Self::ServerChat {
                client_id: ClientId(r.u32()?),
                message: r.string()?,
            },
            PacketType::ClientQuit => Self::ClientQuit,
            PacketType::ServerQuit => Self::ServerQuit {
                client_id: ClientId(r.u32()?),
            },
            PacketType::ClientError => Self::ClientError {
                code: ErrorCode::from_u8(r.u8()?),
            },
            PacketType::ServerErrorQuit => Self::ServerErrorQuit {
                client_id: ClientId(r.u32()?),
                code: ErrorCode::from_u8(r.u8()?),
            },
            PacketType::Count => return Err(ProtocolError::UnknownTag(PacketType::Count as u8)),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallbackKind, PacketTag};

    fn command() -> CommandPacket {
        CommandPacket {
            origin: ClientId(3),
            frame: 1005,
            company: CompanyId(1),
            cmd: 42,
            params: vec![9, 8, 7],
            callback: CallbackKind::Focus,
            is_mine: false,
        }
    }

    /// One instance of every message type.
    fn every_message() -> Vec<GameMessage> {
        vec![
            GameMessage::ServerFull,
            GameMessage::ServerBanned,
            GameMessage::ClientJoin {
                revision: "1.4.0".into(),
            },
            GameMessage::ServerError {
                code: ErrorCode::WrongRevision,
                detail: "expected 1.4.0".into(),
            },
            GameMessage::ServerShutdown,
            GameMessage::ServerAuthRequest {
                method: AuthMethod::Password,
                server_public_key: [1; PUBLIC_KEY_LEN],
                nonce: [2; AUTH_NONCE_LEN],
            },
            GameMessage::ClientAuthResponse {
                public_key: [3; PUBLIC_KEY_LEN],
                proof: vec![4; 32],
                identity_key: vec![5; 32],
                signature: vec![6; 64],
            },
            GameMessage::ServerEnableEncryption { nonce_base: [7; 12] },
            GameMessage::ClientIdentify {
                name: "alice".into(),
                company: CompanyId(0),
            },
            GameMessage::ServerCheckContent {
                content: vec![
                    ContentEntry {
                        id: 10,
                        checksum: [0xAB; CONTENT_CHECKSUM_LEN],
                    },
                    ContentEntry {
                        id: 11,
                        checksum: [0xCD; CONTENT_CHECKSUM_LEN],
                    },
                ],
            },
            GameMessage::ClientContentChecked,
            GameMessage::ServerWelcome {
                client_id: ClientId(2),
            },
            GameMessage::ServerClientInfo {
                client_id: ClientId(2),
                company: CompanyId::SPECTATOR,
                name: "bob".into(),
            },
            GameMessage::ClientGetSnapshot,
            GameMessage::ServerWaitForSnapshot { position: 3 },
            GameMessage::ServerSnapshotBegin { frame: 900 },
            GameMessage::ServerSnapshotSize { total: 4096 },
            GameMessage::ServerSnapshotData {
                chunk: vec![0x55; 100],
            },
            GameMessage::ServerSnapshotDone,
            GameMessage::ClientSnapshotOk,
            GameMessage::ServerClientJoined {
                client_id: ClientId(4),
            },
            GameMessage::ServerFrame {
                frame: 1000,
                frame_max: 1004,
                token: Some(77),
            },
            GameMessage::ClientAck {
                frame: 999,
                token: 77,
            },
            GameMessage::ServerSync {
                frame: 2000,
                checksum: Checksum(0xDEAD_BEEF, 0x0123_4567),
            },
            GameMessage::ClientCommand(CommandPacket {
                frame: 0,
                ..command()
            }),
            GameMessage::ServerCommand(command()),
            GameMessage::ServerCommandRejected {
                cmd: 42,
                code: ErrorCode::InvalidCommand,
            },
            GameMessage::ClientChat {
                message: "gg".into(),
            },
            GameMessage::ServerChat {
                client_id: ClientId(2),
                message: "gg".into(),
            },
            GameMessage::ClientQuit,
            GameMessage::ServerQuit {
                client_id: ClientId(2),
            },
            GameMessage::ClientError {
                code: ErrorCode::Desync,
            },
            GameMessage::ServerErrorQuit {
                client_id: ClientId(2),
                code: ErrorCode::Desync,
            },
        ]
    }

    #[test]
    fn test_every_packet_type_has_a_message() {
        let mut seen: Vec<PacketType> =
            every_message().iter().map(GameMessage::packet_type).collect();
        seen.sort_by_key(|t| t.as_tag());
        assert_eq!(seen, PacketType::ALL.to_vec());
    }

    #[test]
    fn test_encode_then_decode_yields_identical_fields() {
        for msg in every_message() {
            let packet = msg.encode().unwrap();
            assert_eq!(packet.tag(), msg.packet_type().as_tag());
            let decoded = GameMessage::decode(packet.as_bytes()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_server_frame_without_token_sends_zero() {
        let msg = GameMessage::ServerFrame {
            frame: 1,
            frame_max: 2,
            token: None,
        };
        let packet = msg.encode().unwrap();
        assert_eq!(packet.len(), 1 + 4 + 4 + 1);
        assert_eq!(packet.as_bytes().last(), Some(&0));
        assert_eq!(GameMessage::decode(packet.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_server_frame_missing_token_byte_fails() {
        let packet = GameMessage::ServerFrame {
            frame: 1,
            frame_max: 2,
            token: Some(9),
        }
        .encode()
        .unwrap();
        let body = packet.as_bytes();
        assert!(GameMessage::decode(&body[..body.len() - 1]).is_err());
    }

    #[test]
    fn test_direction_follows_prefix() {
        assert_eq!(GameMessage::ClientQuit.direction(), Direction::ToHost);
        assert_eq!(
            GameMessage::ServerFrame {
                frame: 0,
                frame_max: 0,
                token: None
            }
            .direction(),
            Direction::ToParticipant
        );
        for msg in every_message() {
            let is_client = format!("{:?}", msg.packet_type()).starts_with("Client");
            assert_eq!(msg.direction() == Direction::ToHost, is_client, "{msg:?}");
        }
    }

    #[test]
    fn test_decode_sentinel_tag_fails() {
        let body = [PacketType::Count as u8];
        assert!(matches!(
            GameMessage::decode(&body),
            Err(ProtocolError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_decode_truncated_body_fails() {
        let packet = GameMessage::ServerSync {
            frame: 5,
            checksum: Checksum(1, 2),
        }
        .encode()
        .unwrap();
        let bytes = packet.as_bytes();
        for cut in 1..bytes.len() {
            assert!(GameMessage::decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_trailing_bytes_fails() {
        let mut bytes = GameMessage::ClientQuit.encode().unwrap().into_bytes();
        bytes.push(0);
        assert!(matches!(
            GameMessage::decode(&bytes),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_decode_unknown_auth_method_fails() {
        let mut p = Packet::new(PacketType::ServerAuthRequest);
        p.put_u8(9)
            .put_array(&[0; PUBLIC_KEY_LEN])
            .put_array(&[0; AUTH_NONCE_LEN]);
        assert!(matches!(
            GameMessage::decode(p.as_bytes()),
            Err(ProtocolError::InvalidField(_))
        ));
    }
}
