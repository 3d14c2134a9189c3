//! Integration tests for the frame heartbeat.
//!
//! Run with tokio's paused clock so `sleep_until` resolves as soon as
//! every task is idle and time auto-advances.

use std::time::Duration;

use tandem_clock::{FrameTicker, SimClock, TickerConfig, TickerPolicy};

// =========================================================================
// TickerConfig
// =========================================================================

#[test]
fn test_default_config_runs_at_thirty_hz() {
    let cfg = TickerConfig::default();
    assert_eq!(cfg.frame_rate_hz, 30);
    assert_eq!(cfg.policy, TickerPolicy::Skip);
}

#[test]
fn test_with_rate_sets_frame_duration() {
    let cfg = TickerConfig::with_rate(20);
    assert_eq!(cfg.frame_duration(), Some(Duration::from_millis(50)));
}

#[test]
fn test_zero_rate_is_manual_mode() {
    let ticker = FrameTicker::with_rate(0);
    assert!(ticker.is_manual());
    assert_eq!(ticker.frame_duration(), None);
}

#[test]
fn test_validated_clamps_rate() {
    let cfg = TickerConfig::with_rate(10_000).validated();
    assert_eq!(cfg.frame_rate_hz, TickerConfig::MAX_FRAME_RATE_HZ);
}

// =========================================================================
// Beats
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_beats_increment_monotonically() {
    let mut ticker = FrameTicker::with_rate(20);
    for expected in 1..=5 {
        let info = ticker.wait_for_frame().await;
        assert_eq!(info.beat, expected);
        assert!(!info.overrun);
        assert_eq!(info.beats_skipped, 0);
    }
    assert_eq!(ticker.metrics().total_beats, 5);
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_never_fires() {
    let mut ticker = FrameTicker::with_rate(0);
    let result = tokio::time::timeout(Duration::from_secs(5), ticker.wait_for_frame()).await;
    assert!(result.is_err(), "manual ticker should pend forever");
}

#[tokio::test(start_paused = true)]
async fn test_cadence_is_independent_of_work_time() {
    let mut ticker = FrameTicker::with_rate(20);
    let start = tokio::time::Instant::now();
    for _ in 0..4 {
        ticker.wait_for_frame().await;
        ticker.record_frame_end();
    }
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_drops_missed_beats() {
    let mut ticker = FrameTicker::with_rate(20);
    tokio::time::advance(Duration::from_millis(260)).await;
    let info = ticker.wait_for_frame().await;
    assert!(info.overrun);
    assert_eq!(info.beats_skipped, 4);
    assert_eq!(ticker.metrics().total_skipped, 4);
}

#[tokio::test(start_paused = true)]
async fn test_catch_up_policy_fires_missed_beats_immediately() {
    let mut ticker = FrameTicker::new(TickerConfig {
        policy: TickerPolicy::CatchUp { max_catchup: 5 },
        ..TickerConfig::with_rate(20)
    });
    tokio::time::advance(Duration::from_millis(160)).await;
    let start = tokio::time::Instant::now();
    let info = ticker.wait_for_frame().await;
    assert_eq!(info.beats_skipped, 0);
    ticker.wait_for_frame().await;
    // The second beat was already due, so no time passed.
    assert_eq!(start.elapsed(), Duration::ZERO);
}

// =========================================================================
// Metrics
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_record_frame_end_without_beat_is_noop() {
    let mut ticker = FrameTicker::with_rate(20);
    ticker.record_frame_end();
    assert_eq!(ticker.metrics().max_frame_time, Duration::ZERO);
}

// =========================================================================
// Integration: heartbeat drives the authoritative clock
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_drives_clock_inside_select_loop() {
    let mut ticker = FrameTicker::with_rate(20);
    let mut clock = SimClock::authoritative(1000);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(1);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(260)).await;
        tx.send("stop").await.ok();
    });

    loop {
        tokio::select! {
            Some(cmd) = rx.recv() => {
                assert_eq!(cmd, "stop");
                break;
            }
            _ = ticker.wait_for_frame() => {
                clock.advance().unwrap();
                ticker.record_frame_end();
            }
        }
    }

    assert_eq!(clock.frame(), 1005);
}
