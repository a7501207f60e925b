mod exposure_weighted;
mod time_cubed;

use ndarray::Zip;
use num_traits::AsPrimitive;

use crate::config::EstimatorVariant;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::Result;
use crate::frame::Sample;
use crate::grid::PixelGrid;
use crate::totals::SessionTotals;

pub use exposure_weighted::{ExposureWeighted, WeightedSums};
pub use time_cubed::{TimeCubed, TimeCubedSums};

/// Per-pixel running-sum strategy.
///
/// An estimator owns one accumulator cell per pixel. `add_sample` is the
/// scalar kernel applied to a single cell; the frame-level helpers below
/// map it over the grid.
pub trait Estimator: Send + Sync {
    type Cell: Copy + Default + Send + Sync;

    fn variant(&self) -> EstimatorVariant;

    fn cells(&self) -> &PixelGrid<Self::Cell>;

    fn cells_mut(&mut self) -> &mut PixelGrid<Self::Cell>;

    /// Fold one (scaled) sample and its exposure into a cell.
    fn add_sample(cell: &mut Self::Cell, value: f64, exposure: f64);

    /// Session-level bookkeeping once a whole frame has been accumulated.
    fn record_exposure(&mut self, _exposure: f64) {}

    /// `sum(e * v)` for the cell.
    fn value_sum(cell: &Self::Cell) -> f64;

    /// `sum(e * v^2)` for the cell.
    fn value2_sum(cell: &Self::Cell) -> f64;

    /// Raw (unguarded) variance of the pixel value. May come out slightly
    /// negative through cancellation; the finalizer deals with that.
    fn variance(&self, cell: &Self::Cell, mean_pixel_value: f64, totals: &SessionTotals) -> f64;

    fn clear(&mut self) {
        self.cells_mut().clear();
    }
}

/// Accumulate one sample into pixel `(x, y)`.
pub fn accumulate_pixel<E: Estimator>(estimator: &mut E, value: f64, exposure: f64, x: usize, y: usize) {
    E::add_sample(estimator.cells_mut().cell_mut(x, y), value, exposure);
}

/// Accumulate a whole frame, one writer per cell.
///
/// `factor` scales raw samples (see [`SampleScale`](crate::config::SampleScale)).
/// The caller is responsible for matching dimensions.
pub fn accumulate_frame<E: Estimator, T: Sample>(
    estimator: &mut E,
    samples: &PixelGrid<T>,
    factor: f64,
    exposure: f64,
) {
    let cells = estimator.cells_mut().as_array_mut();
    let zip = Zip::from(cells).and(samples.as_array());
    let kernel = |cell: &mut E::Cell, &sample: &T| {
        E::add_sample(cell, sample.as_() * factor, exposure);
    };

    if samples.len() >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_for_each(kernel);
    } else {
        zip.for_each(kernel);
    }
}

/// The running sums of one session, in whichever shape the configured
/// estimator needs.
#[derive(Clone, Debug)]
pub enum RunningSums {
    ExposureWeighted(ExposureWeighted),
    TimeCubed(TimeCubed),
}

impl RunningSums {
    pub fn new(variant: EstimatorVariant, width: usize, height: usize) -> Result<Self> {
        Ok(match variant {
            EstimatorVariant::ExposureWeighted => {
                Self::ExposureWeighted(ExposureWeighted::new(width, height)?)
            }
            EstimatorVariant::TimeCubed => Self::TimeCubed(TimeCubed::new(width, height)?),
        })
    }

    pub fn variant(&self) -> EstimatorVariant {
        match self {
            Self::ExposureWeighted(e) => e.variant(),
            Self::TimeCubed(e) => e.variant(),
        }
    }

    pub fn accumulate(&mut self, value: f64, exposure: f64, x: usize, y: usize) {
        match self {
            Self::ExposureWeighted(e) => accumulate_pixel(e, value, exposure, x, y),
            Self::TimeCubed(e) => accumulate_pixel(e, value, exposure, x, y),
        }
    }

    pub fn accumulate_frame<T: Sample>(&mut self, samples: &PixelGrid<T>, factor: f64, exposure: f64) {
        match self {
            Self::ExposureWeighted(e) => accumulate_frame(e, samples, factor, exposure),
            Self::TimeCubed(e) => accumulate_frame(e, samples, factor, exposure),
        }
    }

    pub fn record_exposure(&mut self, exposure: f64) {
        match self {
            Self::ExposureWeighted(e) => e.record_exposure(exposure),
            Self::TimeCubed(e) => e.record_exposure(exposure),
        }
    }

    /// Unchecked: `(x, y)` must lie inside the grid.
    pub(crate) fn value_sum(&self, x: usize, y: usize) -> f64 {
        match self {
            Self::ExposureWeighted(e) => ExposureWeighted::value_sum(e.cells().cell(x, y)),
            Self::TimeCubed(e) => TimeCubed::value_sum(e.cells().cell(x, y)),
        }
    }

    pub(crate) fn value2_sum(&self, x: usize, y: usize) -> f64 {
        match self {
            Self::ExposureWeighted(e) => ExposureWeighted::value2_sum(e.cells().cell(x, y)),
            Self::TimeCubed(e) => TimeCubed::value2_sum(e.cells().cell(x, y)),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::ExposureWeighted(e) => e.clear(),
            Self::TimeCubed(e) => e.clear(),
        }
    }
}
