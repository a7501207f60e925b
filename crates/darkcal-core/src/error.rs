use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum DarkcalError {
    #[error("Invalid grid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error(
        "Grid dimensions {found_width}x{found_height} do not match session grid {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        found_width: usize,
        found_height: usize,
    },

    #[error("Pixel ({x}, {y}) is outside the {width}x{height} grid")]
    CoordinateOutOfRange {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },

    #[error("Unsupported bit depth: {0} (expected 8 or 16)")]
    UnsupportedBitDepth(u8),

    #[error("Sample value {value} exceeds the {bit_depth}-bit range")]
    SampleOutOfRange { value: f64, bit_depth: u8 },

    #[error("Invalid exposure time: {0} s")]
    InvalidExposure(f64),

    #[error("Exposure time {exposure} s exceeds the configured maximum of {max} s")]
    ExposureOutOfRange { exposure: f64, max: f64 },

    #[error("Invalid significance threshold: {0}")]
    InvalidThreshold(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Accumulator range exceeded: {max_frames} frames with peak contribution {peak} leave the exact f64 range"
    )]
    AccumulatorRange { max_frames: u64, peak: f64 },

    #[error("Frame limit of {0} frames reached for this session")]
    FrameLimitReached(u64),

    #[error("No frames accumulated")]
    NoFrames,

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

pub type Result<T> = std::result::Result<T, DarkcalError>;
