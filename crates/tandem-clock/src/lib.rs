//! Simulation time for Tandem.
//!
//! Two pieces:
//!
//! - [`SimClock`]: the frame counters (executed frame, frame ceiling,
//!   last frame heard from the host, last synced frame) as one context
//!   object. The host owns the canonical clock; every participant owns a
//!   shadow copy driven by the host's `ServerFrame` broadcasts.
//! - [`FrameTicker`]: the host's heartbeat. Fires at a fixed real-time
//!   cadence regardless of network conditions and sits inside the
//!   protocol loop's `tokio::select!`:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(event) = events.recv() => { /* feed the host */ }
//!         _ = ticker.wait_for_frame() => {
//!             host.tick();
//!             ticker.record_frame_end();
//!         }
//!     }
//! }
//! ```

mod clock;
mod ticker;

pub use clock::{ClockError, SimClock};
pub use ticker::{FrameInfo, FrameTicker, TickerConfig, TickerMetrics, TickerPolicy};
