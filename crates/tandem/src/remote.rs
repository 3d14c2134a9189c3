//! The host's view of one remote participant.

use std::fmt;

use tandem_protocol::{ClientId, CommandPacket, Framer, GameMessage, Packet, ProtocolError};
use tandem_session::HostHandshake;
use tandem_sync::SnapshotSender;

/// Where a remote participant is in the join sequence, as seen by the host.
///
/// ```text
/// Inactive → Authenticating → Identifying → CheckingContent → Authorized
///          → WaitingForSnapshot | SendingSnapshot → SnapshotSent → Active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RemoteStatus {
    /// Connected, nothing received yet.
    Inactive,
    /// Auth request sent, waiting for the response.
    Authenticating,
    /// Encrypted, waiting for name and company.
    Identifying,
    /// Content list sent, waiting for confirmation.
    CheckingContent,
    /// Welcomed, may request the snapshot.
    Authorized,
    WaitingForSnapshot,
    SendingSnapshot,
    /// All chunks sent, waiting for the participant to load them.
    SnapshotSent,
    Active,
}

impl RemoteStatus {
    /// The participant holds a snapshot, or one is on its way, so every
    /// newly assigned command must be queued for it.
    pub fn is_snapshot_synced(self) -> bool {
        matches!(
            self,
            Self::SendingSnapshot | Self::SnapshotSent | Self::Active
        )
    }

    /// Other participants have been told about this one.
    pub fn is_announced(self) -> bool {
        self >= Self::Authorized
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One remote connection on the host.
pub(crate) struct RemoteClient {
    pub(crate) id: ClientId,
    pub(crate) status: RemoteStatus,
    pub(crate) framer: Framer,
    /// Encoded frames not yet handed to the transport.
    pub(crate) outgoing: Vec<u8>,
    pub(crate) handshake: Option<HostHandshake>,
    /// Assigned commands not yet sent.
    pub(crate) commands: Vec<CommandPacket>,
    pub(crate) snapshot: Option<SnapshotSender>,
    /// Host frame by which the participant must be active.
    pub(crate) join_deadline: u32,
    pub(crate) last_ack_frame: u32,
    /// Outstanding liveness token and the frame it was sent at.
    pub(crate) token: Option<(u8, u32)>,
    pub(crate) last_token_frame: u32,
}

impl RemoteClient {
    pub(crate) fn new(id: ClientId, max_frame_size: usize, join_deadline: u32) -> Self {
        Self {
            id,
            status: RemoteStatus::Inactive,
            framer: Framer::new(max_frame_size),
            outgoing: Vec::new(),
            handshake: None,
            commands: Vec::new(),
            snapshot: None,
            join_deadline,
            last_ack_frame: 0,
            token: None,
            last_token_frame: 0,
        }
    }

    /// Encodes `msg` and appends the frame to the outgoing buffer.
    pub(crate) fn send(&mut self, msg: &GameMessage) -> Result<(), ProtocolError> {
        self.send_packet(&msg.encode()?)
    }

    /// Frames an already encoded packet, so a broadcast encodes once.
    pub(crate) fn send_packet(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        let bytes = self.framer.encode(packet)?;
        tracing::trace!(client = %self.id, tag = packet.tag(), len = bytes.len(), "queued");
        self.outgoing.extend_from_slice(&bytes);
        Ok(())
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_synced_statuses() {
        assert!(!RemoteStatus::Authorized.is_snapshot_synced());
        assert!(!RemoteStatus::WaitingForSnapshot.is_snapshot_synced());
        assert!(RemoteStatus::SendingSnapshot.is_snapshot_synced());
        assert!(RemoteStatus::Active.is_snapshot_synced());
    }

    #[test]
    fn test_announced_from_authorized_onwards() {
        assert!(!RemoteStatus::CheckingContent.is_announced());
        assert!(RemoteStatus::Authorized.is_announced());
        assert!(RemoteStatus::Active.is_announced());
    }

    #[test]
    fn test_send_appends_frames() {
        let mut remote = RemoteClient::new(ClientId(2), 1024, 10);
        remote.send(&GameMessage::ServerFull).unwrap();
        remote.send(&GameMessage::ServerBanned).unwrap();
        assert_eq!(remote.take_outgoing().len(), 10);
        assert!(remote.outgoing.is_empty());
    }
}
