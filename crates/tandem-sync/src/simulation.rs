//! The collaborators the application provides.

use tandem_protocol::{Checksum, ClientId, CommandPacket, ContentEntry};

/// The deterministic simulation kept in lockstep.
///
/// Every instance must produce the same [`checksum`](Self::checksum)
/// after applying the same commands and steps in the same order. The
/// protocol layer calls these methods at the right frame; the
/// implementation only writes the simulation rules.
pub trait Simulation: Send + 'static {
    /// Applies one command. Called exactly once per command, at its
    /// assigned frame, before that frame's [`step`](Self::step).
    fn apply_command(&mut self, command: &CommandPacket);

    /// Advances the simulation by one frame.
    fn step(&mut self);

    /// Digest of the current state.
    fn checksum(&self) -> Checksum;

    /// Serializes the full state for a joining participant.
    fn save_snapshot(&self) -> Vec<u8>;

    /// Replaces the state with a snapshot produced by
    /// [`save_snapshot`](Self::save_snapshot).
    fn load_snapshot(&mut self, data: &[u8]) -> Result<(), String>;

    /// Checks a command on the host before it is scheduled. A rejected
    /// command is reported to its submitter only. Default: accept all.
    fn validate_command(&self, _origin: ClientId, _command: &CommandPacket) -> Result<(), String> {
        Ok(())
    }

    /// Called when a participant loses its connection while active, so the
    /// local state can be preserved. Default: no-op.
    fn emergency_save(&mut self) {}
}

/// The content (data sets, scripts, maps) an instance has available.
pub trait ContentCatalog: Send + 'static {
    /// What the host requires joining participants to have.
    fn required(&self) -> Vec<ContentEntry>;

    /// Whether this instance has `entry` with a matching checksum.
    fn has(&self, entry: &ContentEntry) -> bool;

    /// The entries of `required` this instance is missing.
    fn missing(&self, required: &[ContentEntry]) -> Vec<ContentEntry> {
        required.iter().filter(|e| !self.has(e)).copied().collect()
    }
}

impl ContentCatalog for Vec<ContentEntry> {
    fn required(&self) -> Vec<ContentEntry> {
        self.clone()
    }

    fn has(&self, entry: &ContentEntry) -> bool {
        self.contains(entry)
    }
}
