#![allow(dead_code)]

use darkcal_core::config::{BitDepth, EstimatorVariant, SessionConfig};
use darkcal_core::frame::{RawFrame, Sample};
use darkcal_core::grid::PixelGrid;
use darkcal_core::session::Session;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Session config for a small grid with default significance settings.
pub fn small_config(width: usize, height: usize, depth: BitDepth) -> SessionConfig {
    SessionConfig::new(width, height, depth)
}

pub fn config_with_estimator(
    width: usize,
    height: usize,
    estimator: EstimatorVariant,
) -> SessionConfig {
    SessionConfig {
        estimator,
        ..SessionConfig::new(width, height, BitDepth::Sixteen)
    }
}

/// Frame with every pixel set to `value`.
pub fn constant_frame<T: Sample>(width: usize, height: usize, value: T, exposure: f64) -> RawFrame<T> {
    let samples = PixelGrid::from_fn(width, height, |_, _| value).expect("valid grid");
    RawFrame::new(samples, exposure)
}

/// Frame built from `f(x, y)`.
pub fn frame_from_fn<T: Sample>(
    width: usize,
    height: usize,
    exposure: f64,
    f: impl FnMut(usize, usize) -> T,
) -> RawFrame<T> {
    RawFrame::new(PixelGrid::from_fn(width, height, f).expect("valid grid"), exposure)
}

/// Accumulate `frames` into a fresh session and finalize it.
pub fn calibrated_session<T: Sample>(config: SessionConfig, frames: &[RawFrame<T>]) -> Session {
    let mut session = Session::new(config).expect("valid config");
    for frame in frames {
        session.accumulate_frame(frame).expect("accumulate");
    }
    session.finalize_all().expect("finalize");
    session
}

/// `count` frames of uniformly random samples in `0..=max`, all at `exposure`.
pub fn random_frames(
    width: usize,
    height: usize,
    count: usize,
    max: u16,
    exposure: f64,
    seed: u64,
) -> Vec<RawFrame<u16>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| frame_from_fn(width, height, exposure, |_, _| rng.random_range(0..=max)))
        .collect()
}
