//! Frame-scheduled command queue.

use std::collections::VecDeque;

use tandem_protocol::CommandPacket;

use crate::SyncError;

/// Commands waiting for their execution frame, in received order.
///
/// Drained by frame eligibility rather than position: a command stays
/// queued until the executed frame reaches its assigned frame, and
/// commands for the same frame come out in the order they went in.
#[derive(Debug, Default, Clone)]
pub struct CommandQueue {
    entries: VecDeque<CommandPacket>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command assigned to a frame after `executed`.
    ///
    /// # Errors
    /// [`SyncError::LateCommand`] if `command.frame <= executed`: the
    /// instance has already stepped past the frame it belongs to.
    pub fn enqueue(&mut self, command: CommandPacket, executed: u32) -> Result<(), SyncError> {
        if command.frame <= executed {
            return Err(SyncError::LateCommand {
                frame: command.frame,
                executed,
            });
        }
        tracing::trace!(frame = command.frame, cmd = command.cmd, "command queued");
        self.entries.push_back(command);
        Ok(())
    }

    /// Removes and returns every command due at or before `frame`, in
    /// received order. Later commands keep their relative order.
    pub fn drain_due(&mut self, frame: u32) -> Vec<CommandPacket> {
        if !self.entries.iter().any(|c| c.frame <= frame) {
            return Vec::new();
        }
        let (due, later): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|c| c.frame <= frame);
        self.entries = later;
        due.into()
    }

    /// Commands scheduled strictly after `frame`, without removing them.
    pub fn pending_after(&self, frame: u32) -> impl Iterator<Item = &CommandPacket> {
        self.entries.iter().filter(move |c| c.frame > frame)
    }

    /// Earliest frame with a queued command.
    pub fn next_frame(&self) -> Option<u32> {
        self.entries.iter().map(|c| c.frame).min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandPacket> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::CompanyId;

    fn cmd(frame: u32, id: u16) -> CommandPacket {
        let mut c = CommandPacket::new(CompanyId(0), id, Vec::new());
        c.frame = frame;
        c
    }

    fn ids(cmds: &[CommandPacket]) -> Vec<u16> {
        cmds.iter().map(|c| c.cmd).collect()
    }

    #[test]
    fn test_enqueue_past_frame_is_late() {
        let mut queue = CommandQueue::new();
        assert_eq!(
            queue.enqueue(cmd(10, 1), 10),
            Err(SyncError::LateCommand {
                frame: 10,
                executed: 10
            })
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_due_never_returns_future_commands() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(5, 1), 0).unwrap();
        queue.enqueue(cmd(6, 2), 0).unwrap();
        assert!(queue.drain_due(4).is_empty());
        assert_eq!(ids(&queue.drain_due(5)), vec![1]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_due_preserves_received_order_within_frame() {
        let mut queue = CommandQueue::new();
        for id in [3, 1, 2] {
            queue.enqueue(cmd(7, id), 0).unwrap();
        }
        assert_eq!(ids(&queue.drain_due(7)), vec![3, 1, 2]);
    }

    #[test]
    fn test_drain_due_keeps_later_entries_in_order() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(9, 1), 0).unwrap();
        queue.enqueue(cmd(5, 2), 0).unwrap();
        queue.enqueue(cmd(9, 3), 0).unwrap();
        assert_eq!(ids(&queue.drain_due(5)), vec![2]);
        assert_eq!(ids(&queue.drain_due(9)), vec![1, 3]);
    }

    #[test]
    fn test_paused_queue_retains_commands() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(3, 1), 0).unwrap();
        // No stepping: draining the current frame leaves the command queued.
        assert!(queue.drain_due(0).is_empty());
        assert_eq!(queue.next_frame(), Some(3));
    }

    #[test]
    fn test_pending_after_filters_without_removing() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(4, 1), 0).unwrap();
        queue.enqueue(cmd(8, 2), 0).unwrap();
        let after: Vec<_> = queue.pending_after(4).map(|c| c.cmd).collect();
        assert_eq!(after, vec![2]);
        assert_eq!(queue.len(), 2);
    }
}
