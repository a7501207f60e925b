use ndarray::Array2;

use crate::error::{DarkcalError, Result};

/// A fixed-size 2D grid of per-pixel values addressed by `(x, y)`.
///
/// Storage is row-major with shape `(height, width)`, so `x` selects the
/// column and `y` the row.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelGrid<T> {
    data: Array2<T>,
}

impl<T: Clone + Default> PixelGrid<T> {
    /// Allocate a grid filled with `T::default()`.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DarkcalError::InvalidDimensions { width, height });
        }
        Ok(Self {
            data: Array2::from_elem((height, width), T::default()),
        })
    }

    /// Reset every cell to `T::default()` without reallocating.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }
}

impl<T> PixelGrid<T> {
    /// Wrap an existing `(height, width)` array.
    pub fn from_array(data: Array2<T>) -> Result<Self> {
        let (height, width) = data.dim();
        if width == 0 || height == 0 {
            return Err(DarkcalError::InvalidDimensions { width, height });
        }
        Ok(Self { data })
    }

    /// Build a grid by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Result<Self> {
        Self::from_array(Array2::from_shape_fn((height, width), |(y, x)| f(x, y)))
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// `(width, height)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width() && y < self.height()
    }

    /// Return an error unless `(x, y)` lies inside the grid.
    pub fn check_coordinate(&self, x: usize, y: usize) -> Result<()> {
        if self.contains(x, y) {
            Ok(())
        } else {
            Err(DarkcalError::CoordinateOutOfRange {
                x,
                y,
                width: self.width(),
                height: self.height(),
            })
        }
    }

    /// Return an error unless `other` has the same dimensions as this grid.
    pub fn check_same_dims<U>(&self, other: &PixelGrid<U>) -> Result<()> {
        if self.dims() == other.dims() {
            Ok(())
        } else {
            Err(DarkcalError::DimensionMismatch {
                expected_width: self.width(),
                expected_height: self.height(),
                found_width: other.width(),
                found_height: other.height(),
            })
        }
    }

    pub fn cell(&self, x: usize, y: usize) -> &T {
        &self.data[[y, x]]
    }

    pub fn cell_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[[y, x]]
    }

    pub fn as_array(&self) -> &Array2<T> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }
}

impl<T: Copy> PixelGrid<T> {
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[[y, x]]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[[y, x]] = value;
    }
}

/// Pixels excluded from the above-threshold counter.
///
/// A `true` cell means the pixel is masked out. Significance is still
/// computed for masked pixels; they just never count as hits.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelMask {
    excluded: PixelGrid<bool>,
}

impl PixelMask {
    /// A mask that excludes nothing.
    pub fn none(width: usize, height: usize) -> Result<Self> {
        Ok(Self {
            excluded: PixelGrid::new(width, height)?,
        })
    }

    /// Use `excluded` directly: `true` marks a masked-out pixel.
    pub fn from_excluded(excluded: PixelGrid<bool>) -> Self {
        Self { excluded }
    }

    /// Build a mask from a region of interest: `true` marks a pixel that
    /// should contribute, everything else is masked out.
    pub fn from_region_of_interest(roi: &PixelGrid<bool>) -> Self {
        Self {
            excluded: PixelGrid {
                data: roi.as_array().mapv(|included| !included),
            },
        }
    }

    pub fn is_masked(&self, x: usize, y: usize) -> bool {
        self.excluded.get(x, y)
    }

    pub fn set_masked(&mut self, x: usize, y: usize, masked: bool) {
        self.excluded.set(x, y, masked);
    }

    pub fn masked_count(&self) -> usize {
        self.excluded.as_array().iter().filter(|&&m| m).count()
    }

    pub fn grid(&self) -> &PixelGrid<bool> {
        &self.excluded
    }

    pub fn dims(&self) -> (usize, usize) {
        self.excluded.dims()
    }
}

/// Extremes and mean of the finite values in a grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Cells holding NaN or an infinity, left out of the statistics above.
    pub non_finite: usize,
}

impl GridSummary {
    pub fn of(grid: &PixelGrid<f64>) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut finite = 0usize;
        let mut non_finite = 0usize;

        for &v in grid.as_array().iter() {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
                sum += v;
                finite += 1;
            } else {
                non_finite += 1;
            }
        }

        if finite == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                non_finite,
            };
        }

        Self {
            min,
            max,
            mean: sum / finite as f64,
            non_finite,
        }
    }
}
