use num_traits::AsPrimitive;
use rayon::prelude::*;

use crate::config::BitDepth;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{DarkcalError, Result};
use crate::grid::PixelGrid;

/// Raw unsigned sensor sample. Implemented for 8- and 16-bit pixels.
///
/// Every kernel converts samples through `as_()` so the same code path
/// serves both depths; the configured [`BitDepth`] only bounds the range.
pub trait Sample: Copy + Default + Send + Sync + AsPrimitive<f64> {}

impl Sample for u8 {}
impl Sample for u16 {}

/// A single raw frame as delivered by acquisition.
#[derive(Clone, Debug)]
pub struct RawFrame<T> {
    /// Pixel samples, indexed by `(x, y)`.
    pub samples: PixelGrid<T>,
    /// Integration time for every pixel of this frame, in seconds.
    pub exposure_seconds: f64,
    pub metadata: FrameMetadata,
}

#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    pub frame_index: usize,
    pub timestamp_ns: Option<u64>,
}

impl<T: Sample> RawFrame<T> {
    pub fn new(samples: PixelGrid<T>, exposure_seconds: f64) -> Self {
        Self {
            samples,
            exposure_seconds,
            metadata: FrameMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn width(&self) -> usize {
        self.samples.width()
    }

    pub fn height(&self) -> usize {
        self.samples.height()
    }

    /// Largest sample in the frame, as f64.
    pub fn peak(&self) -> f64 {
        let data = self.samples.as_array();
        match data.as_slice() {
            Some(slice) if slice.len() >= PARALLEL_PIXEL_THRESHOLD => slice
                .par_iter()
                .map(|&s| s.as_())
                .reduce(|| 0.0, f64::max),
            _ => data.iter().map(|&s| s.as_()).fold(0.0, f64::max),
        }
    }

    /// Reject frames carrying samples beyond the configured depth.
    pub fn check_depth(&self, depth: BitDepth) -> Result<()> {
        let peak = self.peak();
        if peak > depth.max_value() {
            return Err(DarkcalError::SampleOutOfRange {
                value: peak,
                bit_depth: depth.bits(),
            });
        }
        Ok(())
    }
}
