use crate::config::EstimatorVariant;
use crate::error::Result;
use crate::grid::PixelGrid;
use crate::totals::SessionTotals;

use super::Estimator;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeightedSums {
    /// sum(e * v)
    pub value_sum: f64,
    /// sum(e * v^2)
    pub value2_sum: f64,
}

/// Two sums per pixel; variance from `<e*v^2>/E - mean^2`.
#[derive(Clone, Debug)]
pub struct ExposureWeighted {
    sums: PixelGrid<WeightedSums>,
}

impl ExposureWeighted {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Ok(Self {
            sums: PixelGrid::new(width, height)?,
        })
    }
}

impl Estimator for ExposureWeighted {
    type Cell = WeightedSums;

    fn variant(&self) -> EstimatorVariant {
        EstimatorVariant::ExposureWeighted
    }

    fn cells(&self) -> &PixelGrid<WeightedSums> {
        &self.sums
    }

    fn cells_mut(&mut self) -> &mut PixelGrid<WeightedSums> {
        &mut self.sums
    }

    #[inline]
    fn add_sample(cell: &mut WeightedSums, value: f64, exposure: f64) {
        let exp_val = exposure * value;
        cell.value_sum += exp_val;
        cell.value2_sum += exp_val * value;
    }

    fn value_sum(cell: &WeightedSums) -> f64 {
        cell.value_sum
    }

    fn value2_sum(cell: &WeightedSums) -> f64 {
        cell.value2_sum
    }

    fn variance(&self, cell: &WeightedSums, mean_pixel_value: f64, totals: &SessionTotals) -> f64 {
        cell.value2_sum / totals.exposure_sum - mean_pixel_value * mean_pixel_value
    }
}
