mod common;

use approx::assert_abs_diff_eq;

use darkcal_core::config::{
    AutoRaiseConfig, BitDepth, SessionConfig, SignificanceConfig, ThresholdConfig,
};
use darkcal_core::error::DarkcalError;
use darkcal_core::grid::{PixelGrid, PixelMask};
use darkcal_core::session::{Session, SessionState};

use common::{calibrated_session, constant_frame, frame_from_fn, small_config};

/// Baseline of 20 counts/s with a spread of exactly 10 on every pixel:
/// four 1 s frames alternating between 10 and 30.
fn alternating_session(config: SessionConfig) -> Session {
    let frames: Vec<_> = [10u8, 30, 10, 30]
        .into_iter()
        .map(|v| constant_frame(config.width, config.height, v, 1.0))
        .collect();
    calibrated_session(config, &frames)
}

fn flat_session(width: usize, height: usize) -> Session {
    let frames: Vec<_> = (0..5).map(|_| constant_frame(width, height, 20u8, 1.0)).collect();
    calibrated_session(small_config(width, height, BitDepth::Eight), &frames)
}

// ---------------------------------------------------------------------------
// Single-pixel testing
// ---------------------------------------------------------------------------

#[test]
fn test_five_sigma_counts() {
    let mut session = alternating_session(small_config(2, 2, BitDepth::Eight));
    let stats = session.baseline().unwrap().pixel(0, 0);
    assert_eq!(stats.mean_rate, 20.0);
    assert_eq!(stats.std_dev_rate, 10.0);

    let sig = session.test_significance(70u8, 1.0, 0, 0, false).unwrap();
    assert_eq!(sig, 5.0);
    assert_eq!(session.above_threshold_count(), 1);
}

#[test]
fn test_just_below_threshold_not_counted() {
    let mut session = alternating_session(small_config(2, 2, BitDepth::Eight));
    let sig = session.test_significance(69u8, 1.0, 1, 1, false).unwrap();
    assert!((sig - 4.9).abs() < 1e-12);
    assert_eq!(session.above_threshold_count(), 0);
}

#[test]
fn test_rate_uses_live_exposure() {
    let mut session = alternating_session(small_config(1, 1, BitDepth::Eight));
    // 35 counts in 0.5 s is 70 counts/s
    let sig = session.test_significance(35u8, 0.5, 0, 0, false).unwrap();
    assert_eq!(sig, 5.0);
}

#[test]
fn test_masked_pixel_scored_but_not_counted() {
    let mut session = alternating_session(small_config(2, 2, BitDepth::Eight));
    let sig = session.test_significance(200u8, 1.0, 0, 1, true).unwrap();
    assert_eq!(sig, 18.0);
    assert_eq!(session.above_threshold_count(), 0);
    assert_eq!(session.significance_grid().unwrap().get(0, 1), 18.0);
}

#[test]
fn test_zero_spread_boundaries() {
    let mut session = flat_session(2, 1);
    assert_eq!(session.baseline().unwrap().std_dev_rate.get(0, 0), 0.0);

    assert_eq!(session.test_significance(20u8, 1.0, 0, 0, false).unwrap(), 0.0);
    assert_eq!(session.above_threshold_count(), 0);

    assert_eq!(
        session.test_significance(21u8, 1.0, 1, 0, false).unwrap(),
        f64::INFINITY
    );
    assert_eq!(
        session.test_significance(19u8, 1.0, 1, 0, false).unwrap(),
        f64::INFINITY
    );
    assert_eq!(session.above_threshold_count(), 2);
}

#[test]
fn test_counter_is_cumulative_until_reset() {
    let mut session = alternating_session(small_config(2, 2, BitDepth::Eight));
    for _ in 0..3 {
        session.test_significance(90u8, 1.0, 1, 0, false).unwrap();
    }
    assert_eq!(session.above_threshold_count(), 3);

    session.reset_above_threshold_count();
    assert_eq!(session.above_threshold_count(), 0);
    assert_eq!(session.state(), SessionState::Finalized);

    session.test_significance(90u8, 1.0, 1, 0, false).unwrap();
    assert_eq!(session.above_threshold_count(), 1);
}

// ---------------------------------------------------------------------------
// Live sums
// ---------------------------------------------------------------------------

#[test]
fn test_live_sums_leave_baseline_alone() {
    let mut session = alternating_session(small_config(2, 2, BitDepth::Eight));
    let before = session.value_sum(0, 0).unwrap();

    session.test_significance(40u8, 0.5, 0, 0, false).unwrap();
    session.complete_live_frame(0.5).unwrap();

    assert_eq!(session.live_value_sum(0, 0).unwrap(), Some(20.0));
    assert_eq!(session.live_value_sum(1, 0).unwrap(), Some(0.0));
    assert_eq!(session.value_sum(0, 0).unwrap(), before);
    assert_eq!(session.totals().frame_count, 4);

    let live = session.live_totals().unwrap();
    assert_eq!(live.frame_count, 1);
    assert_eq!(live.exposure_sum, 0.5);
}

#[test]
fn test_frame_updates_live_counters() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    session
        .test_frame(&constant_frame(3, 3, 20u8, 0.25), None)
        .unwrap();
    session
        .test_frame(&constant_frame(3, 3, 20u8, 0.25), None)
        .unwrap();

    assert_eq!(session.live_totals().unwrap().frame_count, 2);
    assert_eq!(session.live_value_sum(2, 2).unwrap(), Some(10.0));
}

#[test]
fn test_live_window_rolls_over_at_frame_budget() {
    let config = SessionConfig {
        max_frames: 2,
        ..small_config(1, 1, BitDepth::Eight)
    };
    let mut session = calibrated_session(
        config,
        &[constant_frame(1, 1, 10u8, 1.0), constant_frame(1, 1, 30u8, 1.0)],
    );
    let bright = constant_frame(1, 1, 255u8, 1.0);

    let mut live_counts = Vec::new();
    for _ in 0..50 {
        session.test_frame(&bright, None).unwrap();
        live_counts.push(session.live_totals().unwrap().frame_count);
    }

    assert!(live_counts.iter().all(|&n| n <= 2));
    assert_eq!(live_counts[..4], [1, 2, 1, 2]);
    assert_eq!(session.live_value_sum(0, 0).unwrap(), Some(2.0 * 255.0));
    // hits keep counting across windows
    assert_eq!(session.above_threshold_count(), 50);
}

#[test]
fn test_live_window_rolls_over_per_pixel() {
    let config = SessionConfig {
        max_frames: 2,
        ..small_config(2, 1, BitDepth::Eight)
    };
    let mut session = calibrated_session(
        config,
        &[constant_frame(2, 1, 10u8, 1.0), constant_frame(2, 1, 30u8, 1.0)],
    );

    for v in [11u8, 12, 13] {
        for x in 0..2 {
            session.test_significance(v, 1.0, x, 0, false).unwrap();
        }
        session.complete_live_frame(1.0).unwrap();
    }

    assert_eq!(session.live_totals().unwrap().frame_count, 1);
    assert_eq!(session.live_value_sum(1, 0).unwrap(), Some(13.0));
}

#[test]
fn test_live_sum_outside_grid() {
    let session = alternating_session(small_config(2, 2, BitDepth::Eight));
    assert!(matches!(
        session.live_value_sum(2, 0),
        Err(DarkcalError::CoordinateOutOfRange { x: 2, y: 0, .. })
    ));
    assert!(session.value2_sum(0, 2).is_err());
}

// ---------------------------------------------------------------------------
// Whole-frame testing
// ---------------------------------------------------------------------------

fn hot_frame() -> darkcal_core::frame::RawFrame<u8> {
    frame_from_fn(3, 3, 1.0, |x, y| match (x, y) {
        (1, 1) => 70,
        (2, 0) => 90,
        _ => 20,
    })
}

#[test]
fn test_frame_counts_hot_pixels() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    let report = session.test_frame(&hot_frame(), None).unwrap();

    assert_eq!(report.pixels_above_threshold, 2);
    assert_eq!(report.total_above_threshold, 2);
    assert_eq!(report.threshold, 5.0);
    assert!(!report.threshold_raised);

    let grid = session.significance_grid().unwrap();
    assert_eq!(grid.get(1, 1), 5.0);
    assert_eq!(grid.get(2, 0), 7.0);
    assert_eq!(grid.get(0, 0), 0.0);
}

#[test]
fn test_frame_respects_mask() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    let mut mask = PixelMask::none(3, 3).unwrap();
    mask.set_masked(2, 0, true);

    let report = session.test_frame(&hot_frame(), Some(&mask)).unwrap();
    assert_eq!(report.pixels_above_threshold, 1);
    assert_eq!(session.significance_grid().unwrap().get(2, 0), 7.0);
}

#[test]
fn test_frame_respects_region_of_interest() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    let roi = PixelGrid::from_fn(3, 3, |x, y| (x, y) == (2, 0)).unwrap();
    let mask = PixelMask::from_region_of_interest(&roi);
    assert_eq!(mask.masked_count(), 8);

    let report = session.test_frame(&hot_frame(), Some(&mask)).unwrap();
    assert_eq!(report.pixels_above_threshold, 1);
}

#[test]
fn test_frame_totals_accumulate() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    session.test_frame(&hot_frame(), None).unwrap();
    let report = session.test_frame(&hot_frame(), None).unwrap();

    assert_eq!(report.pixels_above_threshold, 2);
    assert_eq!(report.total_above_threshold, 4);
    assert_eq!(session.above_threshold_count(), 4);
}

#[test]
fn test_frame_and_pixel_scoring_agree() {
    let mut by_frame = alternating_session(small_config(3, 3, BitDepth::Eight));
    let mut by_pixel = alternating_session(small_config(3, 3, BitDepth::Eight));
    let frame = hot_frame();

    by_frame.test_frame(&frame, None).unwrap();
    for y in 0..3 {
        for x in 0..3 {
            by_pixel
                .test_significance(frame.samples.get(x, y), 1.0, x, y, false)
                .unwrap();
        }
    }

    assert_eq!(by_frame.significance_grid(), by_pixel.significance_grid());
    assert_eq!(by_frame.above_threshold_count(), by_pixel.above_threshold_count());
}

#[test]
fn test_mask_dimension_mismatch() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    let mask = PixelMask::none(2, 3).unwrap();
    assert!(matches!(
        session.test_frame(&hot_frame(), Some(&mask)),
        Err(DarkcalError::DimensionMismatch { found_width: 2, .. })
    ));
}

// ---------------------------------------------------------------------------
// Threshold raising
// ---------------------------------------------------------------------------

#[test]
fn test_auto_raise_after_streak() {
    let config = SessionConfig {
        significance: SignificanceConfig {
            auto_raise: Some(AutoRaiseConfig {
                max_frames_above: 2,
                step: 1.0,
            }),
            ..Default::default()
        },
        ..small_config(3, 3, BitDepth::Eight)
    };
    let mut session = alternating_session(config);
    let frame = frame_from_fn(3, 3, 1.0, |x, y| if (x, y) == (1, 1) { 70u8 } else { 20 });

    let first = session.test_frame(&frame, None).unwrap();
    assert!(!first.threshold_raised);

    let second = session.test_frame(&frame, None).unwrap();
    assert!(second.threshold_raised);
    assert_eq!(second.threshold, 5.0);
    assert_eq!(second.pixels_above_threshold, 1);
    assert_eq!(session.significance_threshold(), Some(6.0));

    let third = session.test_frame(&frame, None).unwrap();
    assert_eq!(third.pixels_above_threshold, 0);
    assert_eq!(third.threshold, 6.0);

    session.reset();
    assert_eq!(session.significance_threshold(), Some(5.0));
}

#[test]
fn test_quiet_frame_breaks_streak() {
    let config = SessionConfig {
        significance: SignificanceConfig {
            auto_raise: Some(AutoRaiseConfig {
                max_frames_above: 2,
                step: 1.0,
            }),
            ..Default::default()
        },
        ..small_config(3, 3, BitDepth::Eight)
    };
    let mut session = alternating_session(config);
    let quiet = constant_frame(3, 3, 20u8, 1.0);

    session.test_frame(&hot_frame(), None).unwrap();
    session.test_frame(&quiet, None).unwrap();
    let report = session.test_frame(&hot_frame(), None).unwrap();

    assert!(!report.threshold_raised);
    assert_eq!(session.significance_threshold(), Some(5.0));
}

#[test]
fn test_without_auto_raise_threshold_is_fixed() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    for _ in 0..20 {
        let report = session.test_frame(&hot_frame(), None).unwrap();
        assert!(!report.threshold_raised);
    }
    assert_eq!(session.significance_threshold(), Some(5.0));
    assert_eq!(session.above_threshold_count(), 40);
}

#[test]
fn test_threshold_from_run_size() {
    // 64 pixels over 15625 frames: one chance hit in 1e6 samples
    let config = SessionConfig {
        significance: SignificanceConfig {
            threshold: ThresholdConfig::FromRunSize {
                frames: 15_625,
                expected_false_hits: 1.0,
                offset: 0.5,
            },
            ..Default::default()
        },
        ..small_config(8, 8, BitDepth::Eight)
    };
    let mut session = alternating_session(config);
    let threshold = session.significance_threshold().unwrap();
    assert_abs_diff_eq!(threshold, 4.753_424 + 0.5, epsilon = 1e-4);

    // 72 counts/s scores 5.2, just under the derived threshold
    let sig = session.test_significance(72u8, 1.0, 0, 0, false).unwrap();
    assert!(sig < threshold);
    assert_eq!(session.above_threshold_count(), 0);

    let report = session
        .test_frame(&constant_frame(8, 8, 80u8, 1.0), None)
        .unwrap();
    assert_eq!(report.threshold, threshold);
    assert_eq!(report.pixels_above_threshold, 64);
}

// ---------------------------------------------------------------------------
// Disabled testing and state rules
// ---------------------------------------------------------------------------

#[test]
fn test_disabled_testing_returns_zero() {
    let config = SessionConfig {
        significance: SignificanceConfig {
            enabled: false,
            ..Default::default()
        },
        ..small_config(3, 3, BitDepth::Eight)
    };
    let mut session = Session::new(config).unwrap();

    // No baseline needed when nothing is tested.
    assert_eq!(session.test_significance(255u8, 1.0, 0, 0, false).unwrap(), 0.0);
    let report = session.test_frame(&hot_frame(), None).unwrap();
    assert_eq!(report.pixels_above_threshold, 0);
    assert_eq!(report.total_above_threshold, 0);

    assert!(!session.significance_enabled());
    assert_eq!(session.above_threshold_count(), 0);
    assert_eq!(session.significance_threshold(), None);
    assert!(session.significance_grid().is_none());
    assert_eq!(session.live_value_sum(0, 0).unwrap(), None);
}

#[test]
fn test_testing_requires_baseline() {
    let mut session = Session::new(small_config(3, 3, BitDepth::Eight)).unwrap();
    assert!(matches!(
        session.test_significance(10u8, 1.0, 0, 0, false),
        Err(DarkcalError::InvalidState {
            state: SessionState::Empty,
            ..
        })
    ));

    session.accumulate_frame(&constant_frame(3, 3, 10u8, 1.0)).unwrap();
    assert!(matches!(
        session.test_frame(&hot_frame(), None),
        Err(DarkcalError::InvalidState {
            state: SessionState::Accumulating,
            ..
        })
    ));
}

#[test]
fn test_live_sample_checks() {
    let mut session = alternating_session(small_config(3, 3, BitDepth::Eight));
    assert!(matches!(
        session.test_significance(10u8, 0.0, 0, 0, false),
        Err(DarkcalError::InvalidExposure(_))
    ));
    assert!(matches!(
        session.test_significance(10u8, 1.0, 3, 0, false),
        Err(DarkcalError::CoordinateOutOfRange { .. })
    ));
    assert!(matches!(
        session.test_significance(256u16, 1.0, 0, 0, false),
        Err(DarkcalError::SampleOutOfRange { .. })
    ));
    assert_eq!(session.above_threshold_count(), 0);
}
