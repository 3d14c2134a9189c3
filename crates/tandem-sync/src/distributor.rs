//! Host-side frame assignment for submitted commands.

use std::collections::HashMap;

use tandem_protocol::{ClientId, CommandPacket, CompanyId};

use crate::SyncError;

/// Collects commands submitted between two host ticks and assigns each an
/// execution frame when the tick runs.
///
/// ## Frame assignment
///
/// ```text
/// host frame F ──assign()──▶ every command gets frame F + lead_time
///              ──ceiling()─▶ participants may execute up to F + lead_time - 1
/// ```
///
/// A command is therefore always sent before the ceiling reaches its frame,
/// so no participant can step past a frame whose commands it has not seen.
#[derive(Debug)]
pub struct CommandDistributor {
    lead_time: u32,
    max_per_frame: u32,
    pending: Vec<CommandPacket>,
    submitted: HashMap<ClientId, u32>,
}

impl CommandDistributor {
    /// `lead_time` is raised to at least 1.
    pub fn new(lead_time: u32, max_per_frame: u32) -> Self {
        Self {
            lead_time: lead_time.max(1),
            max_per_frame,
            pending: Vec::new(),
            submitted: HashMap::new(),
        }
    }

    pub fn lead_time(&self) -> u32 {
        self.lead_time
    }

    /// Accepts a command from `origin`, which plays as `origin_company`.
    ///
    /// # Errors
    /// - [`SyncError::NotEntitled`]: spectators may not submit, and nobody
    ///   may act for another company.
    /// - [`SyncError::TooManyCommands`]: `origin` already submitted
    ///   `max_per_frame` commands since the last tick.
    pub fn submit(
        &mut self,
        origin: ClientId,
        origin_company: CompanyId,
        mut command: CommandPacket,
    ) -> Result<(), SyncError> {
        if origin_company.is_spectator() || command.company != origin_company {
            return Err(SyncError::NotEntitled {
                client: origin,
                company: command.company,
            });
        }

        let count = self.submitted.entry(origin).or_default();
        if *count >= self.max_per_frame {
            return Err(SyncError::TooManyCommands {
                client: origin,
                limit: self.max_per_frame,
            });
        }
        *count += 1;

        command.origin = origin;
        command.frame = 0;
        command.is_mine = false;
        self.pending.push(command);
        Ok(())
    }

    /// Assigns `current + lead_time` to every pending command, in
    /// submission order, and resets the per-client counters.
    pub fn assign(&mut self, current: u32) -> Vec<CommandPacket> {
        self.submitted.clear();
        let frame = current.saturating_add(self.lead_time);
        let mut assigned = std::mem::take(&mut self.pending);
        for command in &mut assigned {
            command.frame = frame;
        }
        if !assigned.is_empty() {
            tracing::debug!(frame, count = assigned.len(), "commands assigned");
        }
        assigned
    }

    /// The frame ceiling broadcast to participants at host frame `current`.
    pub fn ceiling(&self, current: u32) -> u32 {
        current.saturating_add(self.lead_time - 1)
    }

    /// Drops pending commands from a client that left before the tick.
    pub fn forget(&mut self, client: ClientId) {
        self.pending.retain(|c| c.origin != client);
        self.submitted.remove(&client);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(company: u8, id: u16) -> CommandPacket {
        CommandPacket::new(CompanyId(company), id, vec![id as u8])
    }

    #[test]
    fn test_assign_at_1000_with_lead_5_gives_1005() {
        let mut distributor = CommandDistributor::new(5, 16);
        distributor.submit(ClientId(2), CompanyId(0), command(0, 1)).unwrap();
        let assigned = distributor.assign(1000);
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].frame, 1005);
        assert_eq!(assigned[0].origin, ClientId(2));
        assert_eq!(distributor.ceiling(1000), 1004);
    }

    #[test]
    fn test_ceiling_stays_below_every_assigned_frame() {
        let distributor = CommandDistributor::new(3, 16);
        for current in [0, 1, 500, u32::MAX - 10] {
            assert!(distributor.ceiling(current) < current.saturating_add(3));
        }
    }

    #[test]
    fn test_assign_keeps_submission_order() {
        let mut distributor = CommandDistributor::new(2, 16);
        distributor.submit(ClientId(3), CompanyId(1), command(1, 7)).unwrap();
        distributor.submit(ClientId::HOST, CompanyId(0), command(0, 4)).unwrap();
        distributor.submit(ClientId(3), CompanyId(1), command(1, 9)).unwrap();
        let order: Vec<_> = distributor.assign(10).iter().map(|c| c.cmd).collect();
        assert_eq!(order, vec![7, 4, 9]);
        assert_eq!(distributor.pending_len(), 0);
    }

    #[test]
    fn test_spectator_may_not_submit() {
        let mut distributor = CommandDistributor::new(2, 16);
        let err = distributor
            .submit(ClientId(2), CompanyId::SPECTATOR, command(0, 1))
            .unwrap_err();
        assert!(matches!(err, SyncError::NotEntitled { .. }));
    }

    #[test]
    fn test_foreign_company_may_not_submit() {
        let mut distributor = CommandDistributor::new(2, 16);
        let err = distributor
            .submit(ClientId(2), CompanyId(1), command(0, 1))
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::NotEntitled {
                client: ClientId(2),
                company: CompanyId(0)
            }
        );
    }

    #[test]
    fn test_rate_limit_resets_each_tick() {
        let mut distributor = CommandDistributor::new(2, 2);
        distributor.submit(ClientId(2), CompanyId(0), command(0, 1)).unwrap();
        distributor.submit(ClientId(2), CompanyId(0), command(0, 2)).unwrap();
        assert!(matches!(
            distributor.submit(ClientId(2), CompanyId(0), command(0, 3)),
            Err(SyncError::TooManyCommands { limit: 2, .. })
        ));
        distributor.assign(1);
        assert!(distributor.submit(ClientId(2), CompanyId(0), command(0, 3)).is_ok());
    }

    #[test]
    fn test_forget_drops_pending_from_client() {
        let mut distributor = CommandDistributor::new(2, 16);
        distributor.submit(ClientId(2), CompanyId(0), command(0, 1)).unwrap();
        distributor.submit(ClientId(3), CompanyId(1), command(1, 2)).unwrap();
        distributor.forget(ClientId(2));
        let left: Vec<_> = distributor.assign(0).iter().map(|c| c.origin).collect();
        assert_eq!(left, vec![ClientId(3)]);
    }

    #[test]
    fn test_zero_lead_time_is_raised_to_one() {
        let distributor = CommandDistributor::new(0, 1);
        assert_eq!(distributor.lead_time(), 1);
        assert_eq!(distributor.ceiling(7), 7);
    }
}
