// pitch-core/src/lib.rs

//! The core logic of the pitch monitor.
//! This crate captures microphone audio, detects pitch with YIN, computes a
//! magnitude spectrum with octave energies, and calibrates readings against a
//! reference tone. It is headless; front ends read a [`PitchFeed`].

pub mod audio;
pub mod calibration;
pub mod config;
pub mod error;
pub mod fft;
pub mod octave;
pub mod pipeline;
pub mod pitch;
pub mod publish;
pub mod settings;
pub mod testing;
pub mod tuning;

pub use calibration::{CalibrationOutcome, CalibrationState, Calibrator, cancel_pair};
pub use config::EngineConfig;
pub use error::{AudioError, CalibrationError, SettingsError};
pub use fft::{Spectrum, SpectrumAnalyzer};
pub use octave::OctaveEnergy;
pub use pipeline::{PitchFeed, ProcessingPipeline, Reading, StartStatus};
pub use pitch::{NO_PITCH, Yin};
