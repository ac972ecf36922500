//! Scripted audio backends and signal helpers.
//!
//! These stand in for the microphone and speaker so the pipeline and the
//! calibrator can be driven without hardware. They are used by this crate's
//! tests and are public so downstream crates can test against them too.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Sender, bounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::audio::{
    CaptureBackend, CaptureStream, PlaybackBackend, PlaybackEvent, PlaybackStream,
};
use crate::config::EngineConfig;
use crate::error::AudioError;

/// A window of `len` samples of a sine at `frequency`, scaled by `amplitude`
/// (1.0 is full scale).
pub fn sine_window(frequency: f64, sample_rate: f64, len: usize, amplitude: f64) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate;
            (amplitude * i16::MAX as f64 * (2.0 * PI * frequency * t).sin()) as i16
        })
        .collect()
}

/// Uniform white noise, reproducible for a given `seed`.
pub fn noise_window(len: usize, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-i16::MAX..=i16::MAX)).collect()
}

/// Counts device releases when dropped.
struct ScriptedDevice {
    released: Arc<AtomicUsize>,
    // Dropping this sender wakes the feeder thread.
    _stop: Option<Sender<()>>,
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a [`ScriptedCaptureBackend`] does when opened.
#[derive(Debug, Clone)]
pub enum CaptureScript {
    /// Delivers these windows in order, then stays open and silent.
    Windows(Vec<Vec<i16>>),
    /// Fails as if the user refused microphone access.
    PermissionDenied,
    /// Fails as if the device were busy or missing.
    Unavailable,
}

/// Capture backend replaying a fixed script.
#[derive(Debug)]
pub struct ScriptedCaptureBackend {
    script: CaptureScript,
    window_size: usize,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ScriptedCaptureBackend {
    pub fn new(script: CaptureScript) -> Self {
        let window_size = match &script {
            CaptureScript::Windows(windows) => windows.first().map_or(0, Vec::len),
            _ => 0,
        };
        Self {
            script,
            window_size,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful opens.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of opened streams that have since been dropped.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for ScriptedCaptureBackend {
    fn open_capture(
        &self,
        config: &EngineConfig,
        windows: Sender<Vec<i16>>,
    ) -> Result<CaptureStream, AudioError> {
        let script = match &self.script {
            CaptureScript::PermissionDenied => return Err(AudioError::PermissionDenied),
            CaptureScript::Unavailable => {
                return Err(AudioError::DeviceUnavailable("scripted device is busy".to_string()));
            }
            CaptureScript::Windows(script) => script.clone(),
        };

        let (stop_tx, stop_rx) = bounded::<()>(0);
        thread::Builder::new()
            .name("scripted-capture".to_string())
            .spawn(move || {
                for window in script {
                    if windows.send(window).is_err() {
                        return;
                    }
                }
                // Hold the sender until the stream is released.
                let _ = stop_rx.recv();
            })?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureStream::new(
            config.sample_rate,
            config.resolve_window_size(Some(self.window_size as u32)),
            ScriptedDevice {
                released: Arc::clone(&self.released),
                _stop: Some(stop_tx),
            },
        ))
    }
}

/// What a [`ScriptedPlaybackBackend`] does when asked to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackScript {
    /// Reports completion immediately.
    Complete,
    /// Never completes; only cancellation ends the run.
    Hang,
    /// Cannot open the output device.
    FailToOpen,
    /// Opens, then reports a stream error.
    FailMidway,
}

/// Playback backend following a fixed script.
#[derive(Debug)]
pub struct ScriptedPlaybackBackend {
    script: PlaybackScript,
    last_tone_len: Mutex<Option<usize>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedPlaybackBackend {
    pub fn new(script: PlaybackScript) -> Self {
        Self {
            script,
            last_tone_len: Mutex::new(None),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sample count of the most recent tone handed to the backend.
    pub fn last_tone_len(&self) -> Option<usize> {
        *self
            .last_tone_len
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Keeps the event sender alive for a hanging playback.
struct HeldEvents {
    _events: Sender<PlaybackEvent>,
    _device: ScriptedDevice,
}

impl PlaybackBackend for ScriptedPlaybackBackend {
    fn play_static(
        &self,
        samples: Vec<i16>,
        _sample_rate: u32,
        events: Sender<PlaybackEvent>,
    ) -> Result<PlaybackStream, AudioError> {
        if self.script == PlaybackScript::FailToOpen {
            return Err(AudioError::DeviceUnavailable("scripted output is busy".to_string()));
        }

        *self
            .last_tone_len
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(samples.len());

        let device = ScriptedDevice {
            released: Arc::clone(&self.released),
            _stop: None,
        };
        match self.script {
            PlaybackScript::Complete => {
                let _ = events.send(PlaybackEvent::Completed);
                Ok(PlaybackStream::new(device))
            }
            PlaybackScript::FailMidway => {
                let _ = events.send(PlaybackEvent::Failed("scripted stream error".to_string()));
                Ok(PlaybackStream::new(device))
            }
            PlaybackScript::Hang | PlaybackScript::FailToOpen => Ok(PlaybackStream::new(HeldEvents {
                _events: events,
                _device: device,
            })),
        }
    }
}
