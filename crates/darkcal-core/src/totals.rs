use serde::{Deserialize, Serialize};

/// Session-level counters advanced once per fully accumulated frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub frame_count: u64,
    /// Sum of per-frame exposures, in seconds.
    pub exposure_sum: f64,
}

impl SessionTotals {
    pub fn record_frame(&mut self, exposure_seconds: f64) {
        self.frame_count += 1;
        self.exposure_sum += exposure_seconds;
    }

    /// True once at least one frame with non-zero exposure was recorded, so
    /// both counters are safe to divide by.
    pub fn has_frames(&self) -> bool {
        self.frame_count > 0 && self.exposure_sum > 0.0
    }

    pub fn mean_exposure(&self) -> f64 {
        self.exposure_sum / self.frame_count as f64
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
