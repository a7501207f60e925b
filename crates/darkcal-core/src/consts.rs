/// Minimum pixel count (h*w) to run per-pixel kernels through Rayon.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Largest integer magnitude an f64 represents exactly (2^53).
///
/// Accumulated sums are kept below this bound so that adding one more frame
/// never loses integer resolution.
pub const ACCUMULATOR_EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Maximum sample value for 8-bit sensors.
pub const MAX_8BIT_VALUE: u16 = u8::MAX as u16;

/// Maximum sample value for 16-bit sensors.
pub const MAX_16BIT_VALUE: u16 = u16::MAX;

/// Default z-score at or above which a live pixel counts as significant.
pub const DEFAULT_SIGNIFICANCE_THRESHOLD: f64 = 5.0;

/// Default upper bound on frames accumulated in one session.
pub const DEFAULT_MAX_FRAMES: u64 = 1_000_000;

/// Default upper bound on a single frame's exposure, in seconds.
pub const DEFAULT_MAX_EXPOSURE_SECONDS: f64 = 1.0;

/// Default grid width used when no sensor size is configured.
pub const DEFAULT_GRID_WIDTH: usize = 640;

/// Default grid height used when no sensor size is configured.
pub const DEFAULT_GRID_HEIGHT: usize = 480;

/// Default number of consecutive frames with hits before the threshold is raised.
pub const DEFAULT_AUTO_RAISE_FRAMES: u32 = 10;

/// Default threshold increment applied by automatic raising.
pub const DEFAULT_AUTO_RAISE_STEP: f64 = 0.5;

/// Positive variances below this many machine epsilons per frame, relative
/// to `sum(e*v^2)/E`, are rounding residue and read as zero.
pub const VARIANCE_TOLERANCE_EPSILONS: f64 = 8.0;

/// Default number of chance hits allowed over a run when the threshold is
/// derived from the run size.
pub const DEFAULT_EXPECTED_FALSE_HITS: f64 = 1.0;
