//! Frame counters as an explicit context object.

/// Errors raised when a caller tries to move simulation time illegally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Stepping would pass the frame ceiling.
    #[error("frame {frame} is at the ceiling {frame_max}")]
    AtCeiling { frame: u32, frame_max: u32 },
}

/// The frame counters of one simulation instance.
///
/// All counters are monotonically non-decreasing. On a participant the
/// executed frame never exceeds the ceiling; on the host (the
/// authoritative clock) stepping carries the ceiling along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimClock {
    frame: u32,
    frame_max: u32,
    frame_server: u32,
    sync_frame: u32,
    authoritative: bool,
}

impl SimClock {
    /// The host's canonical clock, starting at `frame`.
    pub fn authoritative(frame: u32) -> Self {
        Self {
            frame,
            frame_max: frame,
            frame_server: frame,
            sync_frame: frame,
            authoritative: true,
        }
    }

    /// A participant's shadow clock, starting at the frame its snapshot
    /// was captured at. It may not step until the host raises the ceiling.
    pub fn shadow(frame: u32) -> Self {
        Self {
            authoritative: false,
            ..Self::authoritative(frame)
        }
    }

    /// Last executed frame.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Highest frame this instance may execute.
    pub fn frame_max(&self) -> u32 {
        self.frame_max
    }

    /// Most recent frame the host reported.
    pub fn frame_server(&self) -> u32 {
        self.frame_server
    }

    /// Last frame for which a checksum was exchanged.
    pub fn sync_frame(&self) -> u32 {
        self.sync_frame
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Whether one more frame may be executed.
    pub fn can_advance(&self) -> bool {
        self.authoritative || self.frame < self.frame_max
    }

    /// Frames left before the ceiling.
    pub fn headroom(&self) -> u32 {
        self.frame_max.saturating_sub(self.frame)
    }

    /// Executes one frame and returns the new frame number.
    ///
    /// # Errors
    /// [`ClockError::AtCeiling`] on a shadow clock already at its ceiling.
    pub fn advance(&mut self) -> Result<u32, ClockError> {
        if !self.can_advance() {
            return Err(ClockError::AtCeiling {
                frame: self.frame,
                frame_max: self.frame_max,
            });
        }
        self.frame += 1;
        if self.authoritative {
            self.frame_max = self.frame_max.max(self.frame);
            self.frame_server = self.frame;
        }
        Ok(self.frame)
    }

    /// Raises the ceiling. Lower values are ignored.
    pub fn raise_ceiling(&mut self, frame_max: u32) {
        self.frame_max = self.frame_max.max(frame_max);
    }

    /// Records the host's current frame. Lower values are ignored.
    pub fn observe_server_frame(&mut self, frame: u32) {
        self.frame_server = self.frame_server.max(frame);
    }

    /// Records that checksums were exchanged for `frame`.
    pub fn record_sync(&mut self, frame: u32) {
        self.sync_frame = self.sync_frame.max(frame);
    }
}
