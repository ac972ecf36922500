//! # Calibration Module
//!
//! Measures the systematic offset between a known reference tone and what the
//! live pitch pipeline reports for it, and applies that offset to later
//! readings.
//!
//! A calibration run:
//! 1. renders a pure sine at the reference frequency as 16-bit PCM
//! 2. plays it once through the [`PlaybackBackend`]
//! 3. when the last sample has been played, reads the live pitch
//! 4. stores `offset = (reference - detected) / reference`
//!
//! The run blocks the calling thread until the tone completes, fails, or is
//! cancelled through its [`CancelHandle`]. The capture pipeline must be running
//! on its own thread meanwhile; if it is not live when the tone ends, the run
//! finishes with [`CalibrationOutcome::NoLivePitch`] and the offset is left
//! alone.
//!
//! The offset is applied multiplicatively (`raw * offset`) even though it is
//! a normalized difference. Both formulas are kept exactly as the rest of the
//! application expects them.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};

use crate::audio::{PlaybackBackend, PlaybackEvent};
use crate::config::MAX_CALIBRATION_SECONDS;
use crate::error::{AudioError, CalibrationError};
use crate::settings::{CALIBRATION_OFFSET_KEY, SettingsStore};

/// Renders a pure sine tone as 16-bit PCM.
///
/// `floor(sample_rate * duration_seconds)` samples of
/// `trunc(i16::MAX * sin(2π f t))`. The duration is clamped to
/// `[0, MAX_CALIBRATION_SECONDS]`; NaN renders nothing.
pub fn generate_calibration_tone(frequency: f32, duration_seconds: f32, sample_rate: u32) -> Vec<i16> {
    let duration = if duration_seconds.is_nan() {
        0.0
    } else {
        duration_seconds.clamp(0.0, MAX_CALIBRATION_SECONDS)
    };
    let num_samples = (sample_rate as f32 * duration) as usize;
    (0..num_samples)
        .map(|i| {
            let time = i as f64 / sample_rate as f64;
            (i16::MAX as f64 * (2.0 * PI * frequency as f64 * time).sin()) as i16
        })
        .collect()
}

/// Source of the pitch the pipeline is currently publishing.
pub trait LivePitch {
    /// The latest pitch in Hz (possibly the "no pitch" sentinel), or `None`
    /// when no capture session is live.
    fn live_pitch(&self) -> Option<f32>;
}

impl<F> LivePitch for F
where
    F: Fn() -> Option<f32>,
{
    fn live_pitch(&self) -> Option<f32> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    Calibrating,
}

/// How a calibration run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// The tone finished and a new offset was stored.
    Calibrated {
        reference: f32,
        detected: f32,
        offset: f32,
    },
    /// The caller cancelled before the tone finished; the offset is unchanged.
    Cancelled,
    /// The tone finished but no capture session was live to observe it.
    NoLivePitch,
}

/// Creates a cancellation pair for one calibration run.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(1);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Cancels the run holding the matching [`CancelToken`]. Dropping the handle
/// also cancels it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {
        let _ = self.tx.try_send(());
    }
}

/// Observed by [`Calibrator::play_calibration_tone`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self {
            rx: crossbeam_channel::never(),
        }
    }
}

/// Resets the calibrating flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the calibration offset.
pub struct Calibrator {
    sample_rate: u32,
    playback: Arc<dyn PlaybackBackend>,
    settings: Arc<dyn SettingsStore>,
    offset_bits: AtomicU32,
    calibrating: AtomicBool,
}

impl std::fmt::Debug for Calibrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibrator")
            .field("sample_rate", &self.sample_rate)
            .field("offset", &self.offset())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Calibrator {
    /// Creates a calibrator, reading the persisted offset (0.0 when absent).
    pub fn new(
        sample_rate: u32,
        playback: Arc<dyn PlaybackBackend>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let offset = settings.get_f32(CALIBRATION_OFFSET_KEY).unwrap_or(0.0);
        tracing::debug!("[CALIBRATION] Loaded calibration offset {}", offset);
        Self {
            sample_rate,
            playback,
            settings,
            offset_bits: AtomicU32::new(offset.to_bits()),
            calibrating: AtomicBool::new(false),
        }
    }

    pub fn offset(&self) -> f32 {
        f32::from_bits(self.offset_bits.load(Ordering::Acquire))
    }

    pub fn state(&self) -> CalibrationState {
        if self.calibrating.load(Ordering::Acquire) {
            CalibrationState::Calibrating
        } else {
            CalibrationState::Idle
        }
    }

    /// Plays the reference tone and calibrates against the live pitch seen
    /// when it ends.
    ///
    /// # Arguments
    /// * `frequency` - Reference frequency in Hz
    /// * `duration_seconds` - Tone length
    /// * `live_pitch` - The running pipeline's latest pitch
    /// * `cancel` - Token of a [`cancel_pair`]
    ///
    /// # Returns
    /// * `Ok(outcome)` - Calibrated, cancelled, or no live pitch to compare
    /// * `Err(InvalidTone(_))` - Reference or duration out of range; nothing was played
    /// * `Err(AlreadyCalibrating)` - Another run holds the playback device
    /// * `Err(Playback(_))` - The device failed; it has been released
    pub fn play_calibration_tone(
        &self,
        frequency: f32,
        duration_seconds: f32,
        live_pitch: &dyn LivePitch,
        cancel: &CancelToken,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        validate_tone(frequency, duration_seconds)?;
        if self
            .calibrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CalibrationError::AlreadyCalibrating);
        }
        let _run = RunGuard(&self.calibrating);

        let tone = generate_calibration_tone(frequency, duration_seconds, self.sample_rate);
        tracing::info!(
            "[CALIBRATION] Playing {} Hz for {} s ({} samples)",
            frequency,
            duration_seconds,
            tone.len()
        );

        let (events_tx, events_rx) = unbounded();
        let playback = self.playback.play_static(tone, self.sample_rate, events_tx)?;

        select! {
            recv(events_rx) -> event => match event {
                Ok(PlaybackEvent::Completed) => {
                    let detected = live_pitch.live_pitch();
                    drop(playback);
                    match detected {
                        Some(detected) => {
                            tracing::info!("[CALIBRATION] Pitch after calibrating: {}", detected);
                            let offset = self.calibrate(frequency, detected);
                            Ok(CalibrationOutcome::Calibrated {
                                reference: frequency,
                                detected,
                                offset,
                            })
                        }
                        None => {
                            tracing::warn!("[CALIBRATION] Tone finished but no capture session is live");
                            Ok(CalibrationOutcome::NoLivePitch)
                        }
                    }
                }
                Ok(PlaybackEvent::Failed(reason)) => {
                    drop(playback);
                    tracing::warn!("[CALIBRATION] Playback failed: {}", reason);
                    Err(AudioError::Stream(reason).into())
                }
                Err(_) => {
                    drop(playback);
                    Err(AudioError::Stream("playback stopped before the tone finished".to_string()).into())
                }
            },
            recv(cancel.rx) -> _ => {
                drop(playback);
                tracing::info!("[CALIBRATION] Cancelled, offset left at {}", self.offset());
                Ok(CalibrationOutcome::Cancelled)
            }
        }
    }

    /// Stores `(reference - detected) / reference` as the new offset and
    /// returns the offset now in effect. Each call replaces the previous
    /// value, except that a non-finite result (zero reference) is discarded.
    pub fn calibrate(&self, reference: f32, detected: f32) -> f32 {
        let diff = reference - detected;
        let offset = diff / reference;
        tracing::info!("[CALIBRATION] Calibration offset: {}", offset);
        self.store_offset(offset);
        self.offset()
    }

    /// Applies the offset to a raw pitch: `raw * offset`.
    pub fn calibrated_pitch(&self, raw_pitch: f32) -> f32 {
        raw_pitch * self.offset()
    }

    /// Overrides the offset without measuring.
    pub fn set_calibration_offset(&self, offset: f32) {
        tracing::info!("[CALIBRATION] Calibration offset set to {}", offset);
        self.store_offset(offset);
    }

    fn store_offset(&self, offset: f32) {
        if !offset.is_finite() {
            tracing::warn!(
                "[CALIBRATION] Ignoring non-finite offset {}, keeping {}",
                offset,
                self.offset()
            );
            return;
        }
        self.offset_bits.store(offset.to_bits(), Ordering::Release);
        if let Err(e) = self.settings.set_f32(CALIBRATION_OFFSET_KEY, offset) {
            tracing::warn!("[CALIBRATION] Failed to persist calibration offset: {}", e);
        }
    }
}

fn validate_tone(frequency: f32, duration_seconds: f32) -> Result<(), CalibrationError> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(CalibrationError::InvalidTone(format!(
            "reference frequency {frequency} Hz must be positive"
        )));
    }
    if !(0.0..=MAX_CALIBRATION_SECONDS).contains(&duration_seconds) {
        return Err(CalibrationError::InvalidTone(format!(
            "duration {duration_seconds} s must be between 0 and {MAX_CALIBRATION_SECONDS} s"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{JsonSettingsStore, MemorySettingsStore};
    use crate::testing::{PlaybackScript, ScriptedPlaybackBackend};
    use approx::assert_relative_eq;

    fn calibrator(script: PlaybackScript) -> (Calibrator, Arc<ScriptedPlaybackBackend>, Arc<MemorySettingsStore>) {
        let playback = Arc::new(ScriptedPlaybackBackend::new(script));
        let settings = Arc::new(MemorySettingsStore::new());
        let calibrator = Calibrator::new(44100, playback.clone(), settings.clone());
        (calibrator, playback, settings)
    }

    #[test]
    fn tone_has_expected_length_and_shape() {
        let tone = generate_calibration_tone(440.0, 0.5, 44100);
        assert_eq!(tone.len(), 22050);
        assert_eq!(tone[0], 0);
        // Quarter period of 441 Hz at 44100 is exactly 25 samples.
        let tone = generate_calibration_tone(441.0, 0.01, 44100);
        assert!(tone[25] >= i16::MAX - 1);
        assert!(tone.iter().all(|&s| s > i16::MIN));
    }

    #[test]
    fn tone_length_is_capped() {
        let cap = (44100.0 * MAX_CALIBRATION_SECONDS) as usize;
        assert_eq!(generate_calibration_tone(440.0, 1e9, 44100).len(), cap);
        assert!(generate_calibration_tone(440.0, f32::NAN, 44100).is_empty());
        assert!(generate_calibration_tone(440.0, -1.0, 44100).is_empty());
    }

    #[test]
    fn non_finite_offsets_are_not_persisted() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let playback = Arc::new(ScriptedPlaybackBackend::new(PlaybackScript::Complete));
        let settings = Arc::new(JsonSettingsStore::open(&path).unwrap());
        let calibrator = Calibrator::new(44100, playback.clone(), settings);
        calibrator.set_calibration_offset(0.05);

        assert_eq!(calibrator.calibrate(0.0, 440.0), 0.05);
        calibrator.set_calibration_offset(f32::NAN);
        calibrator.set_calibration_offset(f32::INFINITY);
        assert_eq!(calibrator.offset(), 0.05);

        let reopened = Arc::new(JsonSettingsStore::open(&path).unwrap());
        assert_eq!(reopened.get_f32(CALIBRATION_OFFSET_KEY), Some(0.05));
        let restarted = Calibrator::new(44100, playback, reopened);
        assert_eq!(restarted.offset(), 0.05);
    }

    #[test]
    fn unplayable_tones_are_rejected_before_playback() {
        let (calibrator, playback, _) = calibrator(PlaybackScript::Complete);
        let live = || Some(440.0f32);
        for (reference, duration) in [(440.0, 1e9), (440.0, -1.0), (440.0, f32::NAN), (0.0, 1.0), (f32::INFINITY, 1.0)] {
            let result = calibrator.play_calibration_tone(reference, duration, &live, &CancelToken::never());
            assert!(matches!(result, Err(CalibrationError::InvalidTone(_))));
        }
        assert_eq!(playback.last_tone_len(), None);
        assert_eq!(calibrator.state(), CalibrationState::Idle);
        assert_eq!(calibrator.offset(), 0.0);
    }

    #[test]
    fn missing_offset_defaults_to_zero() {
        let (calibrator, _, _) = calibrator(PlaybackScript::Complete);
        assert_eq!(calibrator.offset(), 0.0);
        assert_eq!(calibrator.calibrated_pitch(440.0), 0.0);
    }

    #[test]
    fn persisted_offset_is_loaded() {
        let settings = Arc::new(MemorySettingsStore::with_offset(0.5));
        let playback = Arc::new(ScriptedPlaybackBackend::new(PlaybackScript::Complete));
        let calibrator = Calibrator::new(44100, playback, settings);
        assert_eq!(calibrator.calibrated_pitch(100.0), 50.0);
    }

    #[test]
    fn manual_offset_is_multiplicative() {
        let (calibrator, _, settings) = calibrator(PlaybackScript::Complete);
        calibrator.set_calibration_offset(0.02);
        assert_relative_eq!(calibrator.calibrated_pitch(440.0), 8.8);
        assert_eq!(settings.get_f32(CALIBRATION_OFFSET_KEY), Some(0.02));
    }

    #[test]
    fn calibrate_then_apply_pins_current_formula() {
        let (calibrator, _, settings) = calibrator(PlaybackScript::Complete);
        let (reference, detected) = (440.0f32, 436.0f32);
        calibrator.calibrate(reference, detected);
        assert_eq!(
            calibrator.calibrated_pitch(detected),
            detected * ((reference - detected) / reference)
        );
        assert_eq!(settings.get_f32(CALIBRATION_OFFSET_KEY), Some(4.0 / 440.0));

        // No averaging: a second run replaces the first.
        calibrator.calibrate(reference, 430.0);
        assert_eq!(calibrator.offset(), 10.0 / 440.0);
    }

    #[test]
    fn completed_tone_calibrates_against_live_pitch() {
        let (calibrator, playback, settings) = calibrator(PlaybackScript::Complete);
        let live = || Some(430.0f32);
        let outcome = calibrator
            .play_calibration_tone(440.0, 0.1, &live, &CancelToken::never())
            .unwrap();

        let expected = (440.0f32 - 430.0) / 440.0;
        assert_eq!(
            outcome,
            CalibrationOutcome::Calibrated {
                reference: 440.0,
                detected: 430.0,
                offset: expected,
            }
        );
        assert_eq!(settings.get_f32(CALIBRATION_OFFSET_KEY), Some(expected));
        assert_eq!(playback.last_tone_len(), Some(4410));
        assert_eq!(playback.released(), 1);
        assert_eq!(calibrator.state(), CalibrationState::Idle);
    }

    #[test]
    fn cancellation_releases_device_without_touching_offset() {
        let (calibrator, playback, settings) = calibrator(PlaybackScript::Hang);
        calibrator.set_calibration_offset(0.3);

        let (handle, token) = cancel_pair();
        handle.cancel();
        let live = || Some(100.0f32);
        let outcome = calibrator
            .play_calibration_tone(440.0, 2.0, &live, &token)
            .unwrap();

        assert_eq!(outcome, CalibrationOutcome::Cancelled);
        assert_eq!(calibrator.offset(), 0.3);
        assert_eq!(settings.get_f32(CALIBRATION_OFFSET_KEY), Some(0.3));
        assert_eq!(playback.released(), 1);
        assert_eq!(calibrator.state(), CalibrationState::Idle);
    }

    #[test]
    fn dropping_the_handle_cancels() {
        let (calibrator, _, _) = calibrator(PlaybackScript::Hang);
        let (handle, token) = cancel_pair();
        drop(handle);
        let live = || Some(100.0f32);
        let outcome = calibrator.play_calibration_tone(440.0, 2.0, &live, &token);
        assert!(matches!(outcome, Ok(CalibrationOutcome::Cancelled)));
    }

    #[test]
    fn open_failure_is_reported_and_leaves_idle() {
        let (calibrator, _, _) = calibrator(PlaybackScript::FailToOpen);
        let live = || Some(440.0f32);
        let result = calibrator.play_calibration_tone(440.0, 0.1, &live, &CancelToken::never());
        assert!(matches!(
            result,
            Err(CalibrationError::Playback(AudioError::DeviceUnavailable(_)))
        ));
        assert_eq!(calibrator.state(), CalibrationState::Idle);
        assert_eq!(calibrator.offset(), 0.0);
    }

    #[test]
    fn mid_playback_failure_releases_device() {
        let (calibrator, playback, _) = calibrator(PlaybackScript::FailMidway);
        let live = || Some(440.0f32);
        let result = calibrator.play_calibration_tone(440.0, 0.1, &live, &CancelToken::never());
        assert!(matches!(
            result,
            Err(CalibrationError::Playback(AudioError::Stream(_)))
        ));
        assert_eq!(playback.released(), 1);
        assert_eq!(calibrator.state(), CalibrationState::Idle);
    }

    #[test]
    fn inactive_pipeline_gives_defined_result() {
        let (calibrator, _, _) = calibrator(PlaybackScript::Complete);
        calibrator.set_calibration_offset(0.1);
        let live = || None;
        let outcome = calibrator
            .play_calibration_tone(440.0, 0.1, &live, &CancelToken::never())
            .unwrap();
        assert_eq!(outcome, CalibrationOutcome::NoLivePitch);
        assert_eq!(calibrator.offset(), 0.1);
    }

    #[test]
    fn second_run_is_rejected_while_calibrating() {
        let (calibrator, _, _) = calibrator(PlaybackScript::Hang);
        let calibrator = Arc::new(calibrator);
        let (handle, token) = cancel_pair();

        let running = {
            let calibrator = Arc::clone(&calibrator);
            std::thread::spawn(move || {
                let live = || Some(440.0f32);
                calibrator.play_calibration_tone(440.0, 2.0, &live, &token)
            })
        };

        while calibrator.state() != CalibrationState::Calibrating {
            std::thread::yield_now();
        }
        let live = || Some(440.0f32);
        let second = calibrator.play_calibration_tone(440.0, 2.0, &live, &CancelToken::never());
        assert!(matches!(second, Err(CalibrationError::AlreadyCalibrating)));

        handle.cancel();
        let first = running.join().unwrap();
        assert!(matches!(first, Ok(CalibrationOutcome::Cancelled)));
    }
}
