//! Participant-side checksum comparison.

use std::collections::BTreeMap;

use tandem_protocol::Checksum;

use crate::SyncError;

/// Matches the host's checksums against locally computed ones.
///
/// Either side may arrive first: the host's `ServerSync` usually runs
/// ahead of the participant's executed frame, but a participant that is
/// close behind may already have stepped the frame. Both histories are
/// bounded to `history` frames behind the newest entry.
#[derive(Debug)]
pub struct DesyncDetector {
    expected: BTreeMap<u32, Checksum>,
    local: BTreeMap<u32, Checksum>,
    history: u32,
    last_verified: Option<u32>,
}

impl DesyncDetector {
    pub fn new(history: u32) -> Self {
        Self {
            expected: BTreeMap::new(),
            local: BTreeMap::new(),
            history: history.max(1),
            last_verified: None,
        }
    }

    /// Records the host's checksum for `frame`.
    ///
    /// # Errors
    /// [`SyncError::Desync`] if the local checksum for `frame` is already
    /// known and differs.
    pub fn record_expected(&mut self, frame: u32, checksum: Checksum) -> Result<(), SyncError> {
        if let Some(actual) = self.local.get(&frame).copied() {
            return self.compare(frame, checksum, actual);
        }
        if self.local.last_key_value().is_some_and(|(&newest, _)| newest > frame) {
            tracing::debug!(frame, "host checksum for a frame outside local history, skipped");
            return Ok(());
        }
        self.expected.insert(frame, checksum);
        Self::prune(&mut self.expected, frame, self.history);
        Ok(())
    }

    /// Records the local checksum after executing `frame`.
    ///
    /// # Errors
    /// [`SyncError::Desync`] if the host's checksum for `frame` was
    /// received earlier and differs.
    pub fn record_local(&mut self, frame: u32, checksum: Checksum) -> Result<(), SyncError> {
        self.local.insert(frame, checksum);
        Self::prune(&mut self.local, frame, self.history);
        match self.expected.remove(&frame) {
            Some(expected) => self.compare(frame, expected, checksum),
            None => Ok(()),
        }
    }

    /// Last frame whose checksums were compared and matched.
    pub fn last_verified(&self) -> Option<u32> {
        self.last_verified
    }

    /// Host checksums not yet compared.
    pub fn outstanding(&self) -> usize {
        self.expected.len()
    }

    pub fn reset(&mut self) {
        self.expected.clear();
        self.local.clear();
        self.last_verified = None;
    }

    fn compare(
        &mut self,
        frame: u32,
        expected: Checksum,
        actual: Checksum,
    ) -> Result<(), SyncError> {
        if expected != actual {
            tracing::warn!(frame, %expected, %actual, "checksum mismatch");
            return Err(SyncError::Desync {
                frame,
                expected,
                actual,
            });
        }
        tracing::trace!(frame, "checksum verified");
        self.last_verified = Some(self.last_verified.map_or(frame, |f| f.max(frame)));
        Ok(())
    }

    fn prune(map: &mut BTreeMap<u32, Checksum>, newest: u32, history: u32) {
        let floor = newest.saturating_sub(history);
        while let Some((&oldest, _)) = map.first_key_value() {
            if oldest >= floor {
                break;
            }
            map.pop_first();
        }
    }
}
