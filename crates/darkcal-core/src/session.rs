use std::sync::atomic::{AtomicU64, Ordering};

use num_traits::AsPrimitive;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{DarkcalError, Result};
use crate::estimator::RunningSums;
use crate::finalize::{self, Baseline, PixelStatistics};
use crate::frame::{RawFrame, Sample};
use crate::grid::{PixelGrid, PixelMask};
use crate::significance::{FrameSignificance, SignificanceTester};
use crate::totals::SessionTotals;

/// Lifecycle of a calibration session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing accumulated since creation or the last reset.
    Empty,
    /// Running sums are being filled.
    Accumulating,
    /// The baseline is frozen; only finalize (again) and testing are allowed.
    Finalized,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Accumulating => write!(f, "accumulating"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// One capture session: running sums, the baseline finalized from them, and
/// an optional significance tester for live frames.
///
/// All grids are allocated once in [`Session::new`] and zeroed in place by
/// [`Session::reset`].
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    factor: f64,
    state: SessionState,
    totals: SessionTotals,
    sums: RunningSums,
    baseline: Baseline,
    anomalies: AtomicU64,
    tester: Option<SignificanceTester>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let (w, h) = (config.width, config.height);
        let tester = if config.significance.enabled {
            Some(SignificanceTester::new(&config)?)
        } else {
            None
        };

        info!(
            width = w,
            height = h,
            depth = %config.bit_depth,
            estimator = %config.estimator,
            significance = config.significance.enabled,
            threshold = tester.as_ref().map(SignificanceTester::threshold),
            "Calibration session created"
        );

        Ok(Self {
            factor: config.sample_factor(),
            state: SessionState::Empty,
            totals: SessionTotals::default(),
            sums: RunningSums::new(config.estimator, w, h)?,
            baseline: Baseline::new(w, h)?,
            anomalies: AtomicU64::new(0),
            tester,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn totals(&self) -> &SessionTotals {
        &self.totals
    }

    pub fn running_sums(&self) -> &RunningSums {
        &self.sums
    }

    /// `sum(e * v)` of pixel `(x, y)`.
    pub fn value_sum(&self, x: usize, y: usize) -> Result<f64> {
        self.baseline.mean_rate.check_coordinate(x, y)?;
        Ok(self.sums.value_sum(x, y))
    }

    /// `sum(e * v^2)` of pixel `(x, y)`.
    pub fn value2_sum(&self, x: usize, y: usize) -> Result<f64> {
        self.baseline.mean_rate.check_coordinate(x, y)?;
        Ok(self.sums.value2_sum(x, y))
    }

    /// The baseline, once the session has been finalized.
    pub fn baseline(&self) -> Option<&Baseline> {
        match self.state {
            SessionState::Finalized => Some(&self.baseline),
            _ => None,
        }
    }

    /// Pixels whose variance was clamped. After [`finalize_all`](Self::finalize_all)
    /// this is the count for the current baseline.
    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub fn significance_enabled(&self) -> bool {
        self.tester.is_some()
    }

    /// Cumulative count of unmasked pixels tested at or above threshold.
    pub fn above_threshold_count(&self) -> u64 {
        self.tester
            .as_ref()
            .map_or(0, SignificanceTester::above_threshold_count)
    }

    pub fn reset_above_threshold_count(&mut self) {
        if let Some(tester) = self.tester.as_mut() {
            tester.reset_above_threshold_count();
        }
    }

    /// Threshold currently in force, `None` when testing is disabled.
    pub fn significance_threshold(&self) -> Option<f64> {
        self.tester.as_ref().map(SignificanceTester::threshold)
    }

    pub fn significance_grid(&self) -> Option<&PixelGrid<f64>> {
        self.tester
            .as_ref()
            .map(SignificanceTester::significance_grid)
    }

    /// Live frame counters kept by the tester.
    pub fn live_totals(&self) -> Option<&SessionTotals> {
        self.tester.as_ref().map(SignificanceTester::live_totals)
    }

    /// Live `sum(e * v)` of pixel `(x, y)`, kept by the tester.
    pub fn live_value_sum(&self, x: usize, y: usize) -> Result<Option<f64>> {
        self.baseline.mean_rate.check_coordinate(x, y)?;
        Ok(self
            .tester
            .as_ref()
            .map(|t| t.live_sums().value_sum(x, y)))
    }

    // -----------------------------------------------------------------------
    // Accumulation
    // -----------------------------------------------------------------------

    /// Fold one sample into pixel `(x, y)`.
    ///
    /// Frame counters are not advanced; call [`complete_frame`](Self::complete_frame)
    /// once every pixel of the frame has been accumulated.
    pub fn accumulate<T: Sample>(&mut self, value: T, exposure_seconds: f64, x: usize, y: usize) -> Result<()> {
        self.require_open("accumulate")?;
        self.check_frame_budget()?;
        self.check_exposure(exposure_seconds)?;
        self.baseline.mean_rate.check_coordinate(x, y)?;
        let value = self.scaled(value)?;

        self.sums.accumulate(value, exposure_seconds, x, y);
        self.state = SessionState::Accumulating;
        Ok(())
    }

    /// Advance `frame_count` and `exposure_sum` after a full per-pixel pass.
    pub fn complete_frame(&mut self, exposure_seconds: f64) -> Result<()> {
        self.require_open("complete a frame")?;
        self.check_frame_budget()?;
        self.check_exposure(exposure_seconds)?;

        self.totals.record_frame(exposure_seconds);
        self.sums.record_exposure(exposure_seconds);
        self.state = SessionState::Accumulating;
        Ok(())
    }

    /// Accumulate every pixel of `frame`, then advance the frame counters.
    pub fn accumulate_frame<T: Sample>(&mut self, frame: &RawFrame<T>) -> Result<()> {
        self.require_open("accumulate")?;
        self.check_frame_budget()?;
        self.check_frame(frame)?;

        self.sums
            .accumulate_frame(&frame.samples, self.factor, frame.exposure_seconds);
        self.totals.record_frame(frame.exposure_seconds);
        self.sums.record_exposure(frame.exposure_seconds);
        self.state = SessionState::Accumulating;

        debug!(
            frame = self.totals.frame_count,
            exposure = frame.exposure_seconds,
            index = frame.metadata.frame_index,
            timestamp_ns = ?frame.metadata.timestamp_ns,
            "Frame accumulated"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    /// Finalize a single pixel into the baseline and return its statistics.
    ///
    /// Each call that hits a negative variance adds one to the anomaly count.
    pub fn finalize(&mut self, x: usize, y: usize) -> Result<PixelStatistics> {
        let stats = finalize::finalize_pixel(
            &self.sums,
            &self.totals,
            &mut self.baseline,
            &self.anomalies,
            x,
            y,
        )?;
        self.state = SessionState::Finalized;
        Ok(stats)
    }

    /// Finalize every pixel. Calling this again without new frames yields
    /// identical grids and anomaly count.
    pub fn finalize_all(&mut self) -> Result<&Baseline> {
        finalize::finalize_all(&self.sums, &self.totals, &mut self.baseline, &self.anomalies)?;
        if self.state != SessionState::Finalized {
            info!(
                frames = self.totals.frame_count,
                exposure_sum = self.totals.exposure_sum,
                anomalies = self.anomaly_count(),
                "Session finalized"
            );
        }
        self.state = SessionState::Finalized;
        Ok(&self.baseline)
    }

    // -----------------------------------------------------------------------
    // Significance
    // -----------------------------------------------------------------------

    /// Significance of a live sample at `(x, y)`. `masked` pixels are scored
    /// but never counted. Returns 0 without doing anything when testing is
    /// disabled.
    pub fn test_significance<T: Sample>(
        &mut self,
        value: T,
        exposure_seconds: f64,
        x: usize,
        y: usize,
        masked: bool,
    ) -> Result<f64> {
        if self.tester.is_none() {
            return Ok(0.0);
        }
        self.require_finalized("test significance")?;
        self.check_exposure(exposure_seconds)?;
        self.baseline.mean_rate.check_coordinate(x, y)?;
        let value = self.scaled(value)?;

        let Some(tester) = self.tester.as_mut() else {
            return Ok(0.0);
        };
        Ok(tester.test_pixel(&self.baseline, value, exposure_seconds, x, y, masked))
    }

    /// Advance the tester's live frame counters after a per-pixel pass.
    pub fn complete_live_frame(&mut self, exposure_seconds: f64) -> Result<()> {
        if self.tester.is_none() {
            return Ok(());
        }
        self.require_finalized("complete a live frame")?;
        self.check_exposure(exposure_seconds)?;
        if let Some(tester) = self.tester.as_mut() {
            tester.complete_frame(exposure_seconds);
        }
        Ok(())
    }

    /// Test every pixel of a live frame against the baseline.
    pub fn test_frame<T: Sample>(
        &mut self,
        frame: &RawFrame<T>,
        mask: Option<&PixelMask>,
    ) -> Result<FrameSignificance> {
        if self.tester.is_none() {
            return Ok(FrameSignificance::disabled());
        }
        self.require_finalized("test a frame")?;
        self.check_frame(frame)?;
        if let Some(mask) = mask {
            self.baseline.mean_rate.check_same_dims(mask.grid())?;
        }

        let factor = self.factor;
        let Some(tester) = self.tester.as_mut() else {
            return Ok(FrameSignificance::disabled());
        };
        Ok(tester.test_frame(
            &self.baseline,
            &frame.samples,
            factor,
            frame.exposure_seconds,
            mask,
        ))
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Zero every accumulator, counter and grid and start a new session.
    pub fn reset(&mut self) {
        self.totals.clear();
        self.sums.clear();
        self.baseline.clear();
        self.anomalies.store(0, Ordering::Relaxed);
        if let Some(tester) = self.tester.as_mut() {
            tester.clear();
        }
        self.state = SessionState::Empty;
        info!("Calibration session reset");
    }

    // -----------------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------------

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Finalized {
            return Err(DarkcalError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn require_finalized(&self, operation: &'static str) -> Result<()> {
        if self.state != SessionState::Finalized {
            return Err(DarkcalError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn check_frame_budget(&self) -> Result<()> {
        if self.totals.frame_count >= self.config.max_frames {
            return Err(DarkcalError::FrameLimitReached(self.config.max_frames));
        }
        Ok(())
    }

    fn check_exposure(&self, exposure: f64) -> Result<()> {
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(DarkcalError::InvalidExposure(exposure));
        }
        if exposure > self.config.max_exposure_seconds {
            return Err(DarkcalError::ExposureOutOfRange {
                exposure,
                max: self.config.max_exposure_seconds,
            });
        }
        Ok(())
    }

    fn check_frame<T: Sample>(&self, frame: &RawFrame<T>) -> Result<()> {
        self.baseline.mean_rate.check_same_dims(&frame.samples)?;
        self.check_exposure(frame.exposure_seconds)?;
        frame.check_depth(self.config.bit_depth)
    }

    fn scaled<T: Sample>(&self, value: T) -> Result<f64> {
        let raw: f64 = value.as_();
        if raw > self.config.bit_depth.max_value() {
            return Err(DarkcalError::SampleOutOfRange {
                value: raw,
                bit_depth: self.config.bit_depth.bits(),
            });
        }
        Ok(raw * self.factor)
    }
}
