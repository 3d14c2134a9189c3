//! Fixed-cadence frame heartbeat for the authoritative side.
//!
//! The host advances simulation time on this ticker alone; how quickly
//! participants answer has no influence on it. Participants that fall
//! behind are caught by the liveness check, not by slowing the host.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the loop wakes up late for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickerPolicy {
    /// Drop the missed frames and reschedule from now.
    #[default]
    Skip,
    /// Fire up to `max_catchup` missed frames back to back, then skip the
    /// rest. Keeps wall-clock pacing closer at the cost of bursts.
    CatchUp { max_catchup: u32 },
}

/// Configuration for the [`FrameTicker`].
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// Frames per second. 0 = manual mode (the ticker never fires).
    pub frame_rate_hz: u32,
    pub policy: TickerPolicy,
    /// Fraction of the frame budget (0.0–1.0) above which frame work is
    /// logged as a warning.
    pub budget_warn_threshold: f64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 30,
            policy: TickerPolicy::default(),
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickerConfig {
    /// Maximum supported frame rate.
    pub const MAX_FRAME_RATE_HZ: u32 = 128;

    pub fn with_rate(frame_rate_hz: u32) -> Self {
        Self {
            frame_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values. Called by [`FrameTicker::new`].
    pub fn validated(mut self) -> Self {
        if self.frame_rate_hz > Self::MAX_FRAME_RATE_HZ {
            warn!(
                rate = self.frame_rate_hz,
                max = Self::MAX_FRAME_RATE_HZ,
                "frame_rate_hz exceeds maximum, clamping"
            );
            self.frame_rate_hz = Self::MAX_FRAME_RATE_HZ;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of one frame, or `None` in manual mode.
    pub fn frame_duration(&self) -> Option<Duration> {
        match self.frame_rate_hz {
            0 => None,
            hz => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

// ---------------------------------------------------------------------------
// FrameInfo / metrics
// ---------------------------------------------------------------------------

/// Returned by [`FrameTicker::wait_for_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Heartbeat count, starting at 1. Not the simulation frame.
    pub beat: u64,
    /// The loop woke up late for this beat.
    pub overrun: bool,
    /// Beats dropped because of the overrun.
    pub beats_skipped: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TickerMetrics {
    pub total_beats: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest frame work reported via [`FrameTicker::record_frame_end`].
    pub max_frame_time: Duration,
}

// ---------------------------------------------------------------------------
// FrameTicker
// ---------------------------------------------------------------------------

/// The host's heartbeat.
pub struct FrameTicker {
    config: TickerConfig,
    frame_duration: Option<Duration>,
    beat: u64,
    next_beat: Option<TokioInstant>,
    work_start: Option<Instant>,
    metrics: TickerMetrics,
}

impl FrameTicker {
    pub fn new(config: TickerConfig) -> Self {
        let config = config.validated();
        let frame_duration = config.frame_duration();
        let next_beat = frame_duration.map(|d| TokioInstant::now() + d);

        match frame_duration {
            Some(d) => debug!(
                rate_hz = config.frame_rate_hz,
                frame_ms = d.as_secs_f64() * 1000.0,
                policy = ?config.policy,
                "frame ticker created"
            ),
            None => debug!("frame ticker created in manual mode"),
        }

        Self {
            config,
            frame_duration,
            beat: 0,
            next_beat,
            work_start: None,
            metrics: TickerMetrics::default(),
        }
    }

    pub fn with_rate(frame_rate_hz: u32) -> Self {
        Self::new(TickerConfig::with_rate(frame_rate_hz))
    }

    /// Waits for the next beat.
    ///
    /// Pends forever in manual mode, so a `select!` loop keeps serving its
    /// other branches.
    pub async fn wait_for_frame(&mut self) -> FrameInfo {
        let (due, frame) = match (self.next_beat, self.frame_duration) {
            (Some(due), Some(frame)) => (due, frame),
            _ => std::future::pending().await,
        };

        time::sleep_until(due).await;

        let now = TokioInstant::now();
        self.beat += 1;
        self.work_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(due);
        let overrun = late_by > frame / 10;
        let behind = (late_by.as_nanos() / frame.as_nanos()) as u64;
        let mut beats_skipped = 0;

        self.next_beat = Some(match self.config.policy {
            TickerPolicy::Skip => {
                beats_skipped = behind;
                if behind > 0 {
                    warn!(beat = self.beat, skipped = behind, "frame heartbeat late, skipping");
                }
                now + frame
            }
            TickerPolicy::CatchUp { max_catchup } if behind <= u64::from(max_catchup) => {
                due + frame
            }
            TickerPolicy::CatchUp { max_catchup } => {
                beats_skipped = behind - u64::from(max_catchup);
                warn!(
                    beat = self.beat,
                    behind,
                    skipped = beats_skipped,
                    "frame heartbeat too far behind to catch up"
                );
                now + frame
            }
        });

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += beats_skipped;
        self.metrics.total_beats += 1;
        trace!(beat = self.beat, overrun, "frame beat");

        FrameInfo {
            beat: self.beat,
            overrun,
            beats_skipped,
        }
    }

    /// Marks the end of the work done for the current beat.
    pub fn record_frame_end(&mut self) {
        let Some(start) = self.work_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        self.metrics.max_frame_time = self.metrics.max_frame_time.max(elapsed);

        if let Some(budget) = self.frame_duration {
            let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
            if utilization >= self.config.budget_warn_threshold {
                warn!(
                    beat = self.beat,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    budget_ms = budget.as_secs_f64() * 1000.0,
                    "frame work approaching budget"
                );
            }
        }
    }

    pub fn is_manual(&self) -> bool {
        self.frame_duration.is_none()
    }

    pub fn beat(&self) -> u64 {
        self.beat
    }

    pub fn frame_duration(&self) -> Option<Duration> {
        self.frame_duration
    }

    pub fn metrics(&self) -> &TickerMetrics {
        &self.metrics
    }
}
