use serde::{Deserialize, Serialize};
use statrs::function::erf::erf_inv;

use crate::consts::{
    ACCUMULATOR_EXACT_LIMIT, DEFAULT_AUTO_RAISE_FRAMES, DEFAULT_AUTO_RAISE_STEP,
    DEFAULT_EXPECTED_FALSE_HITS, DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH,
    DEFAULT_MAX_EXPOSURE_SECONDS, DEFAULT_MAX_FRAMES, DEFAULT_SIGNIFICANCE_THRESHOLD,
    MAX_16BIT_VALUE, MAX_8BIT_VALUE,
};
use crate::error::{DarkcalError, Result};

/// Sensor pixel depth. Serialized as the plain number of bits (8 or 16).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BitDepth {
    Eight,
    #[default]
    Sixteen,
}

impl BitDepth {
    pub fn bits(self) -> u8 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    /// Largest sample value representable at this depth.
    pub fn max_value(self) -> f64 {
        match self {
            Self::Eight => MAX_8BIT_VALUE as f64,
            Self::Sixteen => MAX_16BIT_VALUE as f64,
        }
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = DarkcalError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            other => Err(DarkcalError::UnsupportedBitDepth(other)),
        }
    }
}

impl From<BitDepth> for u8 {
    fn from(depth: BitDepth) -> Self {
        depth.bits()
    }
}

impl std::fmt::Display for BitDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Variance estimator used by the finalizer.
///
/// Each variant keeps its own accumulator shape; a session uses exactly one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorVariant {
    /// Sums of `e*v` and `e*v^2`; variance = `<e*v^2>/E - mean^2`.
    #[default]
    ExposureWeighted,
    /// Adds `e^2*v` per pixel and `e^3` per session; variance is the
    /// exposure-weighted spread of `v` around `rate * e`.
    TimeCubed,
}

impl std::fmt::Display for EstimatorVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExposureWeighted => write!(f, "Exposure-weighted"),
            Self::TimeCubed => write!(f, "Time-cubed"),
        }
    }
}

/// How raw samples are scaled before they enter the running sums.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleScale {
    /// Use the sample value as-is.
    #[default]
    Raw,
    /// Divide by the bit depth's maximum value, giving fractions in [0, 1].
    FullScale,
}

impl SampleScale {
    /// Multiplier applied to every sample.
    pub fn factor(self, depth: BitDepth) -> f64 {
        match self {
            Self::Raw => 1.0,
            Self::FullScale => 1.0 / depth.max_value(),
        }
    }
}

impl std::fmt::Display for SampleScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "Raw"),
            Self::FullScale => write!(f, "Full scale"),
        }
    }
}

/// Raise the significance threshold after a run of frames that all had hits.
///
/// The count is of *consecutive* frames: a tested frame without any hit
/// starts it again from zero, so scattered chance hits never raise the
/// threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoRaiseConfig {
    /// Consecutive frames with at least one hit before raising.
    #[serde(default = "default_auto_raise_frames")]
    pub max_frames_above: u32,
    /// Amount added to the threshold on each raise.
    #[serde(default = "default_auto_raise_step")]
    pub step: f64,
}

impl Default for AutoRaiseConfig {
    fn default() -> Self {
        Self {
            max_frames_above: DEFAULT_AUTO_RAISE_FRAMES,
            step: DEFAULT_AUTO_RAISE_STEP,
        }
    }
}

/// How the significance threshold is chosen.
///
/// In a file this is either a bare number or a table:
///
/// ```toml
/// threshold = 5.0
/// # or
/// threshold = { frames = 10000, expected_false_hits = 1.0, offset = 0.0 }
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    /// A z-score used as-is.
    Fixed(f64),
    /// The z-score pure noise reaches `expected_false_hits` times over
    /// `frames` live frames of the whole grid, plus `offset`.
    FromRunSize {
        frames: u64,
        #[serde(default = "default_expected_false_hits")]
        expected_false_hits: f64,
        #[serde(default)]
        offset: f64,
    },
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::Fixed(DEFAULT_SIGNIFICANCE_THRESHOLD)
    }
}

impl ThresholdConfig {
    /// The z-score to test against on a grid of `pixels` pixels.
    ///
    /// For a run of `n = pixels * frames` samples the one-sided tail
    /// probability is `expected_false_hits / n`, giving
    /// `sqrt(2) * erf_inv(1 - 2 * expected_false_hits / n) + offset`.
    pub fn resolve(&self, pixels: usize) -> Result<f64> {
        let threshold = match *self {
            Self::Fixed(threshold) => threshold,
            Self::FromRunSize {
                frames,
                expected_false_hits,
                offset,
            } => {
                if frames == 0 {
                    return Err(DarkcalError::InvalidConfig(
                        "threshold.frames must be at least 1".into(),
                    ));
                }
                if !offset.is_finite() {
                    return Err(DarkcalError::InvalidConfig(format!(
                        "threshold.offset must be finite, got {offset}"
                    )));
                }
                let samples = pixels as f64 * frames as f64;
                let tail = expected_false_hits / samples;
                if !(tail > 0.0 && tail < 0.5) {
                    return Err(DarkcalError::InvalidConfig(format!(
                        "threshold.expected_false_hits must lie in (0, {}), got {expected_false_hits}",
                        samples / 2.0
                    )));
                }
                std::f64::consts::SQRT_2 * erf_inv(1.0 - 2.0 * tail) + offset
            }
        };
        if !threshold.is_finite() {
            return Err(DarkcalError::InvalidThreshold(threshold));
        }
        Ok(threshold)
    }
}

impl std::fmt::Display for ThresholdConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(threshold) => write!(f, "{threshold} sigma"),
            Self::FromRunSize {
                frames,
                expected_false_hits,
                offset,
            } => {
                write!(f, "{expected_false_hits} false hits over {frames} frames")?;
                if *offset != 0.0 {
                    write!(f, " {offset:+} sigma")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignificanceConfig {
    /// When false no tester is built and every significance reads as 0.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// z-score at or above which an unmasked pixel counts as a hit.
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub auto_raise: Option<AutoRaiseConfig>,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: ThresholdConfig::default(),
            auto_raise: None,
        }
    }
}

/// Everything a session needs to know up front. Validated once in
/// [`Session::new`](crate::session::Session::new).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub bit_depth: BitDepth,
    #[serde(default)]
    pub estimator: EstimatorVariant,
    #[serde(default)]
    pub sample_scale: SampleScale,
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,
    #[serde(default = "default_max_exposure_seconds")]
    pub max_exposure_seconds: f64,
    #[serde(default)]
    pub significance: SignificanceConfig,
}

fn default_enabled() -> bool {
    true
}
fn default_expected_false_hits() -> f64 {
    DEFAULT_EXPECTED_FALSE_HITS
}
fn default_auto_raise_frames() -> u32 {
    DEFAULT_AUTO_RAISE_FRAMES
}
fn default_auto_raise_step() -> f64 {
    DEFAULT_AUTO_RAISE_STEP
}
fn default_max_frames() -> u64 {
    DEFAULT_MAX_FRAMES
}
fn default_max_exposure_seconds() -> f64 {
    DEFAULT_MAX_EXPOSURE_SECONDS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_GRID_WIDTH,
            height: DEFAULT_GRID_HEIGHT,
            bit_depth: BitDepth::default(),
            estimator: EstimatorVariant::default(),
            sample_scale: SampleScale::default(),
            max_frames: DEFAULT_MAX_FRAMES,
            max_exposure_seconds: DEFAULT_MAX_EXPOSURE_SECONDS,
            significance: SignificanceConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(width: usize, height: usize, bit_depth: BitDepth) -> Self {
        Self {
            width,
            height,
            bit_depth,
            ..Default::default()
        }
    }

    /// Multiplier applied to raw samples before accumulation.
    pub fn sample_factor(&self) -> f64 {
        self.sample_scale.factor(self.bit_depth)
    }

    /// Largest per-frame contribution any accumulator cell can receive.
    ///
    /// Exposure-weighted sums grow by at most `e*v^2` per frame; the
    /// time-cubed estimator also carries `e^2*v` and `e^3`.
    pub fn peak_contribution(&self) -> f64 {
        let v = self.bit_depth.max_value() * self.sample_factor();
        let e = self.max_exposure_seconds;
        match self.estimator {
            EstimatorVariant::ExposureWeighted => e * v * v,
            EstimatorVariant::TimeCubed => (e * v * v).max(e * e * v).max(e * e * e),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DarkcalError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.max_frames == 0 {
            return Err(DarkcalError::InvalidConfig(
                "max_frames must be at least 1".into(),
            ));
        }
        if !self.max_exposure_seconds.is_finite() || self.max_exposure_seconds <= 0.0 {
            return Err(DarkcalError::InvalidConfig(format!(
                "max_exposure_seconds must be positive, got {}",
                self.max_exposure_seconds
            )));
        }
        self.significance.threshold.resolve(self.width * self.height)?;
        if let Some(ref raise) = self.significance.auto_raise {
            if raise.max_frames_above == 0 {
                return Err(DarkcalError::InvalidConfig(
                    "auto_raise.max_frames_above must be at least 1".into(),
                ));
            }
            if !raise.step.is_finite() || raise.step <= 0.0 {
                return Err(DarkcalError::InvalidConfig(format!(
                    "auto_raise.step must be positive, got {}",
                    raise.step
                )));
            }
        }

        let peak = self.peak_contribution();
        if peak * self.max_frames as f64 > ACCUMULATOR_EXACT_LIMIT {
            return Err(DarkcalError::AccumulatorRange {
                max_frames: self.max_frames,
                peak,
            });
        }
        Ok(())
    }
}
