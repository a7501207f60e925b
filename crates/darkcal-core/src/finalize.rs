use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::Zip;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::{PARALLEL_PIXEL_THRESHOLD, VARIANCE_TOLERANCE_EPSILONS};
use crate::error::{DarkcalError, Result};
use crate::estimator::{Estimator, RunningSums};
use crate::grid::{GridSummary, PixelGrid};
use crate::totals::SessionTotals;

/// Finalized statistics of one pixel, all expressed per second of exposure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelStatistics {
    pub mean_rate: f64,
    pub std_dev_rate: f64,
    pub std_err_rate: f64,
}

/// Per-pixel baseline produced by the finalizer.
#[derive(Clone, Debug)]
pub struct Baseline {
    pub mean_rate: PixelGrid<f64>,
    pub std_dev_rate: PixelGrid<f64>,
    pub std_err_rate: PixelGrid<f64>,
}

/// Min/max/mean of each baseline grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaselineSummary {
    pub mean_rate: GridSummary,
    pub std_dev_rate: GridSummary,
    pub std_err_rate: GridSummary,
}

impl Baseline {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Ok(Self {
            mean_rate: PixelGrid::new(width, height)?,
            std_dev_rate: PixelGrid::new(width, height)?,
            std_err_rate: PixelGrid::new(width, height)?,
        })
    }

    pub fn pixel(&self, x: usize, y: usize) -> PixelStatistics {
        PixelStatistics {
            mean_rate: self.mean_rate.get(x, y),
            std_dev_rate: self.std_dev_rate.get(x, y),
            std_err_rate: self.std_err_rate.get(x, y),
        }
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, stats: PixelStatistics) {
        self.mean_rate.set(x, y, stats.mean_rate);
        self.std_dev_rate.set(x, y, stats.std_dev_rate);
        self.std_err_rate.set(x, y, stats.std_err_rate);
    }

    pub fn summary(&self) -> BaselineSummary {
        BaselineSummary {
            mean_rate: GridSummary::of(&self.mean_rate),
            std_dev_rate: GridSummary::of(&self.std_dev_rate),
            std_err_rate: GridSummary::of(&self.std_err_rate),
        }
    }

    pub fn clear(&mut self) {
        self.mean_rate.clear();
        self.std_dev_rate.clear();
        self.std_err_rate.clear();
    }
}

/// Largest variance indistinguishable from rounding residue.
///
/// Summing `e*v` and `e*v^2` for an exposure that is not a binary fraction
/// (0.1 s, 1/30 s) leaves a residue of a few ulps of `value2_mean` per frame
/// even when every reading is identical.
pub fn variance_tolerance(value2_mean: f64, frame_count: u64) -> f64 {
    VARIANCE_TOLERANCE_EPSILONS * f64::EPSILON * frame_count as f64 * value2_mean.abs()
}

/// Standard deviation rate for a raw variance.
///
/// A negative variance can only come from cancellation between two large,
/// nearly equal sums. It is clamped to zero and recorded in `anomalies`
/// instead of producing a NaN. Positive residue up to `tolerance` also reads
/// as zero but is not an anomaly.
pub fn std_dev_rate(
    variance: f64,
    tolerance: f64,
    mean_exposure: f64,
    anomalies: &AtomicU64,
) -> f64 {
    if variance < 0.0 {
        anomalies.fetch_add(1, Ordering::Relaxed);
        0.0
    } else if variance <= tolerance {
        0.0
    } else {
        variance.sqrt() / mean_exposure
    }
}

/// Statistics of one accumulator cell.
pub fn pixel_statistics<E: Estimator>(
    estimator: &E,
    cell: &E::Cell,
    totals: &SessionTotals,
    anomalies: &AtomicU64,
) -> PixelStatistics {
    let mean_exposure = totals.mean_exposure();
    let mean_pixel_value = E::value_sum(cell) / totals.exposure_sum;
    let mean_rate = mean_pixel_value / mean_exposure;

    let variance = estimator.variance(cell, mean_pixel_value, totals);
    let tolerance = variance_tolerance(
        E::value2_sum(cell) / totals.exposure_sum,
        totals.frame_count,
    );
    let std_dev_rate = std_dev_rate(variance, tolerance, mean_exposure, anomalies);
    let std_err_rate = std_dev_rate / (totals.frame_count as f64).sqrt();

    PixelStatistics {
        mean_rate,
        std_dev_rate,
        std_err_rate,
    }
}

/// Finalize every pixel of `estimator` into `baseline`, one writer per cell.
pub fn finalize_grid<E: Estimator>(
    estimator: &E,
    totals: &SessionTotals,
    baseline: &mut Baseline,
    anomalies: &AtomicU64,
) {
    let cells = estimator.cells();
    let zip = Zip::from(cells.as_array())
        .and(baseline.mean_rate.as_array_mut())
        .and(baseline.std_dev_rate.as_array_mut())
        .and(baseline.std_err_rate.as_array_mut());
    let kernel = |cell: &E::Cell, mean: &mut f64, std_dev: &mut f64, std_err: &mut f64| {
        let stats = pixel_statistics(estimator, cell, totals, anomalies);
        *mean = stats.mean_rate;
        *std_dev = stats.std_dev_rate;
        *std_err = stats.std_err_rate;
    };

    if cells.len() >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_for_each(kernel);
    } else {
        zip.for_each(kernel);
    }
}

fn check_totals(totals: &SessionTotals) -> Result<()> {
    if totals.has_frames() {
        Ok(())
    } else {
        Err(DarkcalError::NoFrames)
    }
}

/// Finalize a single pixel and store it in `baseline`.
pub fn finalize_pixel(
    sums: &RunningSums,
    totals: &SessionTotals,
    baseline: &mut Baseline,
    anomalies: &AtomicU64,
    x: usize,
    y: usize,
) -> Result<PixelStatistics> {
    check_totals(totals)?;
    baseline.mean_rate.check_coordinate(x, y)?;

    let stats = match sums {
        RunningSums::ExposureWeighted(e) => {
            pixel_statistics(e, e.cells().cell(x, y), totals, anomalies)
        }
        RunningSums::TimeCubed(e) => pixel_statistics(e, e.cells().cell(x, y), totals, anomalies),
    };
    baseline.set_pixel(x, y, stats);
    Ok(stats)
}

/// Finalize the whole grid. `anomalies` is zeroed first so that afterwards
/// it holds the number of clamped pixels in this baseline.
pub fn finalize_all(
    sums: &RunningSums,
    totals: &SessionTotals,
    baseline: &mut Baseline,
    anomalies: &AtomicU64,
) -> Result<()> {
    check_totals(totals)?;
    anomalies.store(0, Ordering::Relaxed);

    match sums {
        RunningSums::ExposureWeighted(e) => finalize_grid(e, totals, baseline, anomalies),
        RunningSums::TimeCubed(e) => finalize_grid(e, totals, baseline, anomalies),
    }

    let anomalous = anomalies.load(Ordering::Relaxed);
    if anomalous > 0 {
        warn!(
            pixels = anomalous,
            "Negative variance clamped to zero (floating-point cancellation)"
        );
    }

    let summary = baseline.summary();
    debug!(
        frames = totals.frame_count,
        exposure_sum = totals.exposure_sum,
        estimator = %sums.variant(),
        mean_min = summary.mean_rate.min,
        mean_max = summary.mean_rate.max,
        std_dev_min = summary.std_dev_rate.min,
        std_dev_max = summary.std_dev_rate.max,
        "Baseline finalized"
    );
    Ok(())
}
