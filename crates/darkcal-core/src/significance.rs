use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::Zip;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AutoRaiseConfig, SessionConfig};
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::Result;
use crate::estimator::RunningSums;
use crate::finalize::Baseline;
use crate::frame::Sample;
use crate::grid::{PixelGrid, PixelMask};
use crate::totals::SessionTotals;

/// z-score of a live rate against a pixel's baseline.
///
/// A zero baseline spread means the pixel never varied: exactly the mean
/// rate scores 0, anything else scores `+inf`.
pub fn significance(rate: f64, mean_rate: f64, std_dev_rate: f64) -> f64 {
    let deviation = rate - mean_rate;
    if std_dev_rate == 0.0 {
        if deviation == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        deviation / std_dev_rate
    }
}

/// Outcome of testing one live frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSignificance {
    /// Unmasked pixels of this frame at or above the threshold.
    pub pixels_above_threshold: u64,
    /// Cumulative counter after this frame.
    pub total_above_threshold: u64,
    /// Threshold the frame was tested against.
    pub threshold: f64,
    /// Set when this frame triggered an automatic threshold raise.
    pub threshold_raised: bool,
}

impl FrameSignificance {
    /// Report for a session with significance testing turned off.
    pub fn disabled() -> Self {
        Self {
            pixels_above_threshold: 0,
            total_above_threshold: 0,
            threshold: f64::INFINITY,
            threshold_raised: false,
        }
    }
}

/// Tests live frames against a finalized baseline.
///
/// Keeps its own live running sums, updated exactly like the session
/// accumulator, so testing never disturbs the baseline. The live sums cover
/// at most `max_frames` frames: the next frame starts a fresh window.
#[derive(Debug)]
pub struct SignificanceTester {
    live: RunningSums,
    live_totals: SessionTotals,
    max_frames: u64,
    significance: PixelGrid<f64>,
    unmasked: PixelMask,
    configured_threshold: f64,
    threshold: f64,
    auto_raise: Option<AutoRaiseConfig>,
    streak: u32,
    above_threshold: AtomicU64,
}

impl SignificanceTester {
    /// Build a tester for `config`, resolving its threshold for the grid size.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let (width, height) = (config.width, config.height);
        let threshold = config.significance.threshold.resolve(width * height)?;
        Ok(Self {
            live: RunningSums::new(config.estimator, width, height)?,
            live_totals: SessionTotals::default(),
            max_frames: config.max_frames,
            significance: PixelGrid::new(width, height)?,
            unmasked: PixelMask::none(width, height)?,
            configured_threshold: threshold,
            threshold,
            auto_raise: config.significance.auto_raise.clone(),
            streak: 0,
            above_threshold: AtomicU64::new(0),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn above_threshold_count(&self) -> u64 {
        self.above_threshold.load(Ordering::Relaxed)
    }

    pub fn reset_above_threshold_count(&mut self) {
        self.above_threshold.store(0, Ordering::Relaxed);
        self.streak = 0;
    }

    /// Most recent significance of every pixel.
    pub fn significance_grid(&self) -> &PixelGrid<f64> {
        &self.significance
    }

    pub fn live_sums(&self) -> &RunningSums {
        &self.live
    }

    pub fn live_totals(&self) -> &SessionTotals {
        &self.live_totals
    }

    /// Advance the live frame counters after a per-pixel pass.
    pub fn complete_frame(&mut self, exposure: f64) {
        self.roll_over_if_full();
        self.live_totals.record_frame(exposure);
        self.live.record_exposure(exposure);
    }

    /// Test a single pixel. `value` is already scaled.
    pub fn test_pixel(
        &mut self,
        baseline: &Baseline,
        value: f64,
        exposure: f64,
        x: usize,
        y: usize,
        masked: bool,
    ) -> f64 {
        self.roll_over_if_full();
        self.live.accumulate(value, exposure, x, y);

        let sig = significance(
            value / exposure,
            baseline.mean_rate.get(x, y),
            baseline.std_dev_rate.get(x, y),
        );
        self.significance.set(x, y, sig);

        if !masked && sig >= self.threshold {
            self.above_threshold.fetch_add(1, Ordering::Relaxed);
        }
        sig
    }

    /// Test every pixel of a frame. Dimensions are checked by the caller.
    pub fn test_frame<T: Sample>(
        &mut self,
        baseline: &Baseline,
        samples: &PixelGrid<T>,
        factor: f64,
        exposure: f64,
        mask: Option<&PixelMask>,
    ) -> FrameSignificance {
        self.roll_over_if_full();
        self.live.accumulate_frame(samples, factor, exposure);
        self.complete_frame(exposure);

        let mask = mask.unwrap_or(&self.unmasked);
        let threshold = self.threshold;
        let hits = AtomicU64::new(0);

        let zip = Zip::from(self.significance.as_array_mut())
            .and(samples.as_array())
            .and(baseline.mean_rate.as_array())
            .and(baseline.std_dev_rate.as_array())
            .and(mask.grid().as_array());
        let kernel = |sig: &mut f64, &sample: &T, &mean: &f64, &std_dev: &f64, &masked: &bool| {
            *sig = significance(sample.as_() * factor / exposure, mean, std_dev);
            if !masked && *sig >= threshold {
                hits.fetch_add(1, Ordering::Relaxed);
            }
        };

        if samples.len() >= PARALLEL_PIXEL_THRESHOLD {
            zip.par_for_each(kernel);
        } else {
            zip.for_each(kernel);
        }

        let pixels_above_threshold = hits.into_inner();
        let total = self
            .above_threshold
            .fetch_add(pixels_above_threshold, Ordering::Relaxed)
            + pixels_above_threshold;
        let threshold_raised = self.track_streak(pixels_above_threshold);

        debug!(
            frame = self.live_totals.frame_count,
            hits = pixels_above_threshold,
            total,
            threshold,
            "Live frame tested"
        );

        FrameSignificance {
            pixels_above_threshold,
            total_above_threshold: total,
            threshold,
            threshold_raised,
        }
    }

    /// Returns true when the threshold was raised.
    fn track_streak(&mut self, hits: u64) -> bool {
        let Some(ref raise) = self.auto_raise else {
            return false;
        };
        if hits == 0 {
            self.streak = 0;
            return false;
        }

        self.streak += 1;
        if self.streak < raise.max_frames_above {
            return false;
        }

        let previous = self.threshold;
        self.threshold += raise.step;
        self.streak = 0;
        info!(
            from = previous,
            to = self.threshold,
            frames = raise.max_frames_above,
            "Raised significance threshold"
        );
        true
    }

    /// Keep the live sums inside the exact f64 range the frame budget was
    /// validated for.
    fn roll_over_if_full(&mut self) {
        if self.live_totals.frame_count < self.max_frames {
            return;
        }
        info!(
            frames = self.live_totals.frame_count,
            exposure_sum = self.live_totals.exposure_sum,
            "Live sums full, starting a new window"
        );
        self.live.clear();
        self.live_totals.clear();
    }

    /// Zero live sums, counters and the significance grid. The threshold
    /// returns to its configured value.
    pub fn clear(&mut self) {
        self.live.clear();
        self.live_totals.clear();
        self.significance.clear();
        self.threshold = self.configured_threshold;
        self.streak = 0;
        self.above_threshold.store(0, Ordering::Relaxed);
    }
}
