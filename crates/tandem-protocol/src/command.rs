//! The unit of simulation mutation that travels between instances.

use crate::{CallbackKind, ClientId, CompanyId, Packet, PacketReader, ProtocolError};

/// One state-changing operation submitted by a participant.
///
/// Lifecycle: the submitter sends it with `frame == 0`; the host assigns
/// the execution frame and echoes it to everyone; every instance applies
/// it exactly once when its executed frame reaches `frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    /// Participant that submitted the command. Filled in by the host.
    pub origin: ClientId,
    /// Execution frame. `0` until the host assigns one.
    pub frame: u32,
    /// Company the command acts for.
    pub company: CompanyId,
    /// Application-defined command identifier.
    pub cmd: u16,
    /// Opaque parameters, interpreted by the simulation only.
    pub params: Vec<u8>,
    pub callback: CallbackKind,
    /// `true` only on the submitter's own instance. Never on the wire;
    /// derived on receipt by comparing `origin` with the local identity.
    pub is_mine: bool,
}

impl CommandPacket {
    pub fn new(company: CompanyId, cmd: u16, params: Vec<u8>) -> Self {
        Self {
            origin: ClientId::INVALID,
            frame: 0,
            company,
            cmd,
            params,
            callback: CallbackKind::None,
            is_mine: false,
        }
    }

    pub fn with_callback(mut self, callback: CallbackKind) -> Self {
        self.callback = callback;
        self
    }

    pub(crate) fn write(&self, p: &mut Packet) -> Result<(), ProtocolError> {
        p.put_u32(self.origin.0)
            .put_u8(self.company.0)
            .put_u16(self.cmd)
            .put_buffer(&self.params)?
            .put_u8(self.callback.as_u8())
            .put_u32(self.frame);
        Ok(())
    }

    pub(crate) fn read(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        let origin = ClientId(r.u32()?);
        let company = CompanyId(r.u8()?);
        let cmd = r.u16()?;
        let params = r.buffer()?;
        let callback =
            CallbackKind::from_u8(r.u8()?).ok_or(ProtocolError::InvalidField("callback kind"))?;
        let frame = r.u32()?;
        Ok(Self {
            origin,
            frame,
            company,
            cmd,
            params,
            callback,
            is_mine: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketType;

    #[test]
    fn test_is_mine_is_not_transmitted() {
        let mut cmd = CommandPacket::new(CompanyId(2), 17, vec![1, 2, 3]);
        cmd.origin = ClientId(5);
        cmd.frame = 1005;
        cmd.is_mine = true;

        let mut p = Packet::new(PacketType::ServerCommand);
        cmd.write(&mut p).unwrap();
        let mut r = PacketReader::new(p.as_bytes());
        r.tag::<PacketType>().unwrap();
        let decoded = CommandPacket::read(&mut r).unwrap();
        r.finish().unwrap();

        assert!(!decoded.is_mine);
        assert_eq!(decoded.frame, 1005);
        assert_eq!(decoded.origin, ClientId(5));
        assert_eq!(decoded.params, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_rejects_unknown_callback() {
        let mut p = Packet::new(PacketType::ClientCommand);
        p.put_u32(1).put_u8(0).put_u16(3).put_buffer(&[]).unwrap();
        p.put_u8(99).put_u32(0);
        let mut r = PacketReader::new(p.as_bytes());
        r.tag::<PacketType>().unwrap();
        assert!(matches!(
            CommandPacket::read(&mut r),
            Err(ProtocolError::InvalidField(_))
        ));
    }
}
