use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use darkcal_core::config::{BitDepth, SessionConfig};
use darkcal_core::frame::{FrameMetadata, RawFrame, Sample};
use darkcal_core::grid::PixelGrid;
use darkcal_core::session::Session;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::summary::{print_run_summary, print_session_summary, RunReport};

#[derive(Args)]
pub struct SimulateArgs {
    /// Session config (TOML); defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of dark frames to calibrate on
    #[arg(long, default_value = "200")]
    pub frames: u64,

    /// Number of live frames to test after calibration
    #[arg(long, default_value = "20")]
    pub live_frames: u64,

    /// Seed for the synthetic sensor
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Hot pixels injected into every live frame
    #[arg(long, default_value = "10")]
    pub hot_pixels: usize,

    /// Mean dark signal in counts per second
    #[arg(long, default_value = "40.0")]
    pub dark_rate: f64,

    /// Read noise amplitude in counts
    #[arg(long, default_value = "2.0")]
    pub read_noise: f64,
}

/// Sample types the synthetic sensor can emit.
trait SyntheticSample: Sample {
    fn from_level(level: f64) -> Self;
}

impl SyntheticSample for u8 {
    fn from_level(level: f64) -> Self {
        level.round() as u8
    }
}

impl SyntheticSample for u16 {
    fn from_level(level: f64) -> Self {
        level.round() as u16
    }
}

/// Uniform-noise dark sensor. Signal grows linearly with exposure.
struct SyntheticSensor {
    rng: StdRng,
    width: usize,
    height: usize,
    dark_rate: f64,
    read_noise: f64,
    max_value: f64,
    clock_ns: u64,
}

impl SyntheticSensor {
    fn level(&mut self, exposure: f64) -> f64 {
        let mean = self.dark_rate * exposure;
        let spread = self.read_noise + mean.sqrt();
        (mean + self.rng.random_range(-spread..=spread)).clamp(0.0, self.max_value)
    }

    fn frame<T: SyntheticSample>(&mut self, exposure: f64, index: usize) -> Result<RawFrame<T>> {
        let samples = PixelGrid::from_fn(self.width, self.height, |_, _| {
            T::from_level(self.level(exposure))
        })?;
        let timestamp_ns = self.clock_ns;
        self.clock_ns += (exposure * 1e9).round() as u64;
        Ok(RawFrame::new(samples, exposure).with_metadata(FrameMetadata {
            frame_index: index,
            timestamp_ns: Some(timestamp_ns),
        }))
    }

    /// Brightest plausible reading: far outside the dark distribution, clipped
    /// to the sensor range.
    fn hot_level(&self, exposure: f64) -> f64 {
        let mean = self.dark_rate * exposure;
        (mean + 20.0 * (self.read_noise + mean.sqrt())).min(self.max_value)
    }
}

pub fn run(args: &SimulateArgs) -> Result<()> {
    let config = match args.config {
        Some(ref path) => super::config::load(path)?,
        None => SessionConfig::default(),
    };
    if args.dark_rate < 0.0 || args.read_noise < 0.0 {
        anyhow::bail!("--dark-rate and --read-noise must not be negative");
    }

    print_session_summary(&config);

    match config.bit_depth {
        BitDepth::Eight => simulate::<u8>(config, args),
        BitDepth::Sixteen => simulate::<u16>(config, args),
    }
}

fn progress_bar(len: u64, label: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!("{label:<10} [{{bar:40}}] {{pos}}/{{len}}"))?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn simulate<T: SyntheticSample>(config: SessionConfig, args: &SimulateArgs) -> Result<()> {
    let max_exposure = config.max_exposure_seconds;
    let mut sensor = SyntheticSensor {
        rng: StdRng::seed_from_u64(args.seed),
        width: config.width,
        height: config.height,
        dark_rate: args.dark_rate,
        read_noise: args.read_noise,
        max_value: config.bit_depth.max_value(),
        clock_ns: 0,
    };
    let mut session = Session::new(config).context("Failed to create session")?;

    let pb = progress_bar(args.frames, "Calibrate")?;
    for i in 0..args.frames {
        let exposure = sensor.rng.random_range(max_exposure * 0.25..=max_exposure);
        let frame: RawFrame<T> = sensor.frame(exposure, i as usize)?;
        session
            .accumulate_frame(&frame)
            .with_context(|| format!("Failed to accumulate dark frame {i}"))?;
        pb.inc(1);
    }
    pb.finish();

    session.finalize_all().context("Failed to finalize baseline")?;

    let hot: Vec<(usize, usize)> = (0..args.hot_pixels)
        .map(|_| {
            (
                sensor.rng.random_range(0..sensor.width),
                sensor.rng.random_range(0..sensor.height),
            )
        })
        .collect();
    debug!(pixels = ?hot, "Injecting hot pixels");

    let hot_sample = T::from_level(sensor.hot_level(max_exposure));
    let mut frames_with_hits = 0;
    let mut threshold_raises = 0;

    let pb = progress_bar(args.live_frames, "Test")?;
    for i in 0..args.live_frames {
        let mut frame: RawFrame<T> = sensor.frame(max_exposure, i as usize)?;
        for &(x, y) in &hot {
            frame.samples.set(x, y, hot_sample);
        }

        let report = session
            .test_frame(&frame, None)
            .with_context(|| format!("Failed to test live frame {i}"))?;
        if report.pixels_above_threshold > 0 {
            frames_with_hits += 1;
        }
        if report.threshold_raised {
            threshold_raises += 1;
        }
        pb.inc(1);
    }
    pb.finish();

    let report = RunReport {
        hot_pixels: hot.len(),
        live_frames: args.live_frames,
        frames_with_hits,
        threshold_raises,
    };
    print_run_summary(&session, &report);
    Ok(())
}
