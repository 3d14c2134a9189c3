//! Network configuration shared by host and participants.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tandem_clock::{TickerConfig, TickerPolicy};
use tandem_protocol::{DEFAULT_MAX_FRAME_SIZE, HEADER_LEN, TAG_LEN};
use tandem_sync::DEFAULT_MAX_SNAPSHOT_SIZE;
use tracing::warn;

use crate::TandemError;

/// Bytes a snapshot data frame adds around its chunk: length header, tag,
/// buffer length prefix and the encryption tag.
const SNAPSHOT_FRAME_OVERHEAD: usize = HEADER_LEN + 1 + 2 + TAG_LEN;

/// Tuning for one session.
///
/// Host and participants must agree on `revision`; everything else is
/// only read by the side that uses it. Missing fields in a config file
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host frames per second.
    pub frame_rate: u32,
    /// Frames between a command's assignment and its execution.
    pub lead_time: u32,
    /// Frames between checksum broadcasts.
    pub sync_interval: u32,
    /// Frames between liveness tokens sent to one participant.
    pub token_interval: u32,
    /// Frames a participant may take to echo a token.
    pub max_lag_frames: u32,
    /// Frames a joining participant may take to become active.
    pub join_timeout_frames: u32,
    pub snapshot_chunk_size: usize,
    /// Snapshot chunks sent per host frame.
    pub snapshot_chunks_per_tick: usize,
    /// Largest snapshot a participant will download, in bytes.
    pub max_snapshot_size: usize,
    pub max_frame_size: usize,
    /// Remote participants, not counting the host.
    pub max_clients: usize,
    /// Commands one participant may submit between two host frames.
    pub max_commands_per_frame: u32,
    /// Frames of checksum history a participant keeps.
    pub checksum_history: u32,
    /// Build identifier; joiners with a different one are refused.
    pub revision: String,
    /// Name this instance plays under.
    pub player_name: String,
    pub ticker_policy: TickerPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            lead_time: 5,
            sync_interval: 100,
            token_interval: 32,
            max_lag_frames: 500,
            join_timeout_frames: 600,
            snapshot_chunk_size: 4096,
            snapshot_chunks_per_tick: 8,
            max_snapshot_size: DEFAULT_MAX_SNAPSHOT_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_clients: 15,
            max_commands_per_frame: 16,
            checksum_history: 256,
            revision: env!("CARGO_PKG_VERSION").to_string(),
            player_name: "player".to_string(),
            ticker_policy: TickerPolicy::default(),
        }
    }
}

impl NetworkConfig {
    /// Parses a JSON config and clamps it.
    pub fn from_json(json: &str) -> Result<Self, TandemError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TandemError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Clamps out-of-range values, logging each adjustment.
    pub fn validated(mut self) -> Self {
        fn at_least<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: &mut T, min: T) {
            if *value < min {
                warn!(field = name, value = %value, min = %min, "config value too small, raising");
                *value = min;
            }
        }

        at_least("frame_rate", &mut self.frame_rate, 1);
        if self.frame_rate > TickerConfig::MAX_FRAME_RATE_HZ {
            warn!(
                value = self.frame_rate,
                max = TickerConfig::MAX_FRAME_RATE_HZ,
                "frame_rate exceeds maximum, clamping"
            );
            self.frame_rate = TickerConfig::MAX_FRAME_RATE_HZ;
        }
        at_least("lead_time", &mut self.lead_time, 1);
        at_least("sync_interval", &mut self.sync_interval, 1);
        at_least("token_interval", &mut self.token_interval, 1);
        // A token must be answerable before the next one is due.
        at_least(
            "max_lag_frames",
            &mut self.max_lag_frames,
            self.token_interval.saturating_add(self.lead_time),
        );
        at_least("join_timeout_frames", &mut self.join_timeout_frames, 1);
        at_least("max_frame_size", &mut self.max_frame_size, 256);
        if self.max_frame_size > u32::MAX as usize {
            self.max_frame_size = u32::MAX as usize;
        }
        at_least("snapshot_chunk_size", &mut self.snapshot_chunk_size, 1);
        let chunk_max = (self.max_frame_size - SNAPSHOT_FRAME_OVERHEAD).min(u16::MAX as usize);
        if self.snapshot_chunk_size > chunk_max {
            warn!(
                value = self.snapshot_chunk_size,
                max = chunk_max,
                "snapshot_chunk_size does not fit in a frame, clamping"
            );
            self.snapshot_chunk_size = chunk_max;
        }
        at_least("snapshot_chunks_per_tick", &mut self.snapshot_chunks_per_tick, 1);
        if self.max_snapshot_size > u32::MAX as usize {
            warn!(
                value = self.max_snapshot_size,
                "max_snapshot_size exceeds the wire limit, clamping"
            );
            self.max_snapshot_size = u32::MAX as usize;
        }
        at_least("max_clients", &mut self.max_clients, 1);
        at_least("max_commands_per_frame", &mut self.max_commands_per_frame, 1);
        at_least("checksum_history", &mut self.checksum_history, self.sync_interval);
        self
    }

    /// Heartbeat settings for the host's frame ticker.
    pub fn ticker(&self) -> TickerConfig {
        TickerConfig {
            policy: self.ticker_policy,
            ..TickerConfig::with_rate(self.frame_rate)
        }
    }
}
