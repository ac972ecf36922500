// pitch-monitor/src/main.rs

//! Console front end of the pitch core.
//!
//! `monitor` prints live readings, `calibrate` plays the reference tone and
//! stores the measured offset, and `set-offset` stores an offset directly.

mod display;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pitch_core::audio::CpalBackend;
use pitch_core::calibration::{CalibrationOutcome, CancelHandle, Calibrator, cancel_pair};
use pitch_core::config::EngineConfig;
use pitch_core::pipeline::{ProcessingPipeline, StartStatus};
use pitch_core::settings::JsonSettingsStore;

/// Default settings file, next to where the monitor is started.
const SETTINGS_FILE: &str = "pitch_settings.json";

/// How long to wait for the first reading before giving up.
const FIRST_READING_TIMEOUT: Duration = Duration::from_secs(5);

/// real-time pitch monitor with calibration
#[derive(Parser)]
#[command(name = "pitch-monitor")]
#[command(about = "real-time pitch detection, octave spectrum and calibration")]
struct Cli {
    /// engine configuration file (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// settings file holding the calibration offset
    #[arg(short, long, default_value = SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// print live pitch readings
    Monitor {
        /// stop after this many seconds (runs until the device stops when omitted)
        #[arg(long)]
        seconds: Option<f64>,

        /// minimum time between printed lines, in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// play the reference tone and store the measured offset
    Calibrate {
        /// reference frequency in Hz (overrides the configuration)
        #[arg(long)]
        reference: Option<f32>,

        /// tone duration in seconds (overrides the configuration)
        #[arg(long)]
        duration: Option<f32>,
    },
    /// store a calibration offset without measuring
    SetOffset {
        #[arg(allow_hyphen_values = true)]
        offset: f32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let settings = Arc::new(
        JsonSettingsStore::open(&cli.settings)
            .with_context(|| format!("failed to open settings {}", cli.settings.display()))?,
    );
    let backend = Arc::new(CpalBackend::new());
    let calibrator = Calibrator::new(config.sample_rate, backend.clone(), settings.clone());

    match cli.command {
        Command::Monitor {
            seconds,
            interval_ms,
        } => {
            let limit = seconds
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("--seconds must be a non-negative number")?;
            let mut pipeline = ProcessingPipeline::new(config, backend);
            start_pipeline(&mut pipeline)?;
            run_monitor(&pipeline, &calibrator, limit, Duration::from_millis(interval_ms));
            pipeline.stop();
        }
        Command::Calibrate {
            reference,
            duration,
        } => {
            let reference = reference.unwrap_or(config.reference_frequency);
            let duration = duration.unwrap_or(config.calibration_seconds);
            let mut pipeline = ProcessingPipeline::new(config, backend);
            start_pipeline(&mut pipeline)?;
            run_calibration(&pipeline, &calibrator, reference, duration)?;
            pipeline.stop();
        }
        Command::SetOffset { offset } => {
            if !offset.is_finite() {
                bail!("offset must be a finite number, got {offset}");
            }
            calibrator.set_calibration_offset(offset);
            println!(
                "Calibration offset set to {} ({})",
                calibrator.offset(),
                settings.path().display()
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    EngineConfig::from_json(&data).with_context(|| format!("invalid config {}", path.display()))
}

fn start_pipeline(pipeline: &mut ProcessingPipeline) -> Result<()> {
    match pipeline.start().context("failed to start audio capture")? {
        StartStatus::Started {
            sample_rate,
            window_size,
        } => {
            tracing::info!(
                "[MAIN] Recording at {} Hz, {} samples per window",
                sample_rate,
                window_size
            );
            Ok(())
        }
        StartStatus::AlreadyRunning => Ok(()),
        StartStatus::PermissionDenied => bail!("microphone permission was denied"),
    }
}

fn run_monitor(
    pipeline: &ProcessingPipeline,
    calibrator: &Calibrator,
    limit: Option<Duration>,
    interval: Duration,
) {
    let feed = pipeline.feed();
    let started = Instant::now();
    let mut seen = feed.version();

    println!("{}", display::header());
    while pipeline.is_recording() && limit.is_none_or(|limit| started.elapsed() < limit) {
        if let Some((reading, version)) = feed.wait_for_update(seen, interval) {
            seen = version;
            println!(
                "{}",
                display::status_line(
                    reading.pitch_hz,
                    calibrator.calibrated_pitch(reading.pitch_hz),
                    &reading.spectrum.octave_energy,
                )
            );
            thread::sleep(interval);
        }
    }
}

fn run_calibration(
    pipeline: &ProcessingPipeline,
    calibrator: &Calibrator,
    reference: f32,
    duration: f32,
) -> Result<()> {
    let feed = pipeline.feed();
    if feed.wait_for_update(feed.version(), FIRST_READING_TIMEOUT).is_none() {
        bail!("no audio received from the input device");
    }

    let (handle, token) = cancel_pair();
    // Held here so that closing stdin does not cancel the run.
    let pending: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(Some(handle)));
    {
        let pending = Arc::clone(&pending);
        thread::spawn(move || {
            let mut line = String::new();
            if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                let handle = pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                if let Some(handle) = handle {
                    handle.cancel();
                }
            }
        });
    }

    println!("Playing {reference} Hz for {duration} s, press Enter to cancel...");
    let outcome = calibrator
        .play_calibration_tone(reference, duration, &feed, &token)
        .context("calibration failed")?;

    match outcome {
        CalibrationOutcome::Calibrated {
            reference,
            detected,
            offset,
        } => println!("Detected {detected} Hz for {reference} Hz, offset {offset}"),
        CalibrationOutcome::Cancelled => println!("Calibration cancelled, offset unchanged"),
        CalibrationOutcome::NoLivePitch => {
            println!("Capture stopped before the tone ended, offset unchanged")
        }
    }
    Ok(())
}
