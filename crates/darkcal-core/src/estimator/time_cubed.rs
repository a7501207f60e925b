use crate::config::EstimatorVariant;
use crate::error::Result;
use crate::grid::PixelGrid;
use crate::totals::SessionTotals;

use super::Estimator;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeCubedSums {
    /// sum(e * v)
    pub value_sum: f64,
    /// sum(e * v^2)
    pub value2_sum: f64,
    /// sum(e^2 * v)
    pub exposure2_value_sum: f64,
}

/// Three sums per pixel plus `sum(e^3)` per session.
///
/// With `m` the mean rate, the variance is the exposure-weighted spread of
/// each reading around its expected value `m * e`:
///
/// ```text
/// sum(e * (v - m*e)^2) / E = (sum(e*v^2) + m^2 * sum(e^3) - 2*m*sum(e^2*v)) / E
/// ```
///
/// Under constant exposure this reduces to the exposure-weighted estimator.
#[derive(Clone, Debug)]
pub struct TimeCubed {
    sums: PixelGrid<TimeCubedSums>,
    exposure3_sum: f64,
}

impl TimeCubed {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Ok(Self {
            sums: PixelGrid::new(width, height)?,
            exposure3_sum: 0.0,
        })
    }

    /// sum(e^3) over all recorded frames.
    pub fn exposure3_sum(&self) -> f64 {
        self.exposure3_sum
    }
}

impl Estimator for TimeCubed {
    type Cell = TimeCubedSums;

    fn variant(&self) -> EstimatorVariant {
        EstimatorVariant::TimeCubed
    }

    fn cells(&self) -> &PixelGrid<TimeCubedSums> {
        &self.sums
    }

    fn cells_mut(&mut self) -> &mut PixelGrid<TimeCubedSums> {
        &mut self.sums
    }

    #[inline]
    fn add_sample(cell: &mut TimeCubedSums, value: f64, exposure: f64) {
        let exp_val = exposure * value;
        cell.value_sum += exp_val;
        cell.value2_sum += exp_val * value;
        cell.exposure2_value_sum += exp_val * exposure;
    }

    fn record_exposure(&mut self, exposure: f64) {
        self.exposure3_sum += exposure * exposure * exposure;
    }

    fn value_sum(cell: &TimeCubedSums) -> f64 {
        cell.value_sum
    }

    fn value2_sum(cell: &TimeCubedSums) -> f64 {
        cell.value2_sum
    }

    fn variance(&self, cell: &TimeCubedSums, mean_pixel_value: f64, totals: &SessionTotals) -> f64 {
        let mean_rate = mean_pixel_value / totals.mean_exposure();
        (cell.value2_sum + mean_rate * mean_rate * self.exposure3_sum
            - 2.0 * mean_rate * cell.exposure2_value_sum)
            / totals.exposure_sum
    }

    fn clear(&mut self) {
        self.sums.clear();
        self.exposure3_sum = 0.0;
    }
}
