//! # Processing Pipeline
//!
//! Owns the capture session. While running, a dedicated worker thread opens
//! the input device, receives fixed-size windows from it, runs pitch detection
//! and spectrum analysis on each one, and publishes the result as the latest
//! [`Reading`].
//!
//! The device is opened on the worker thread because audio streams cannot be
//! moved between threads; the outcome of opening it is reported back to
//! [`ProcessingPipeline::start`] before it returns.
//!
//! Readers hold a [`PitchFeed`]. Every reading they observe was produced from
//! a single window, and readings are published in window order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::audio::CaptureBackend;
use crate::calibration::LivePitch;
use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::fft::{Spectrum, SpectrumAnalyzer};
use crate::pitch::{self, NO_PITCH, Yin};
use crate::publish::{self, Publisher, Subscriber};

/// Analysis of one capture window.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Raw YIN estimate in Hz, or [`NO_PITCH`].
    pub pitch_hz: f32,
    /// Magnitudes and octave energies of the same window.
    pub spectrum: Spectrum,
}

impl Reading {
    /// The value readers see before the first window.
    pub fn initial() -> Self {
        Self {
            pitch_hz: NO_PITCH,
            spectrum: Spectrum::empty(),
        }
    }

    pub fn is_pitched(&self) -> bool {
        pitch::is_pitched(self.pitch_hz)
    }
}

/// Runs both analyses on one window.
pub fn analyze_window(yin: &Yin, analyzer: &SpectrumAnalyzer, window: &[i16]) -> Reading {
    Reading {
        pitch_hz: yin.get_pitch(window),
        spectrum: analyzer.analyze(window),
    }
}

/// Read side of the pipeline's published readings.
#[derive(Clone)]
pub struct PitchFeed {
    readings: Subscriber<Reading>,
    live: Arc<AtomicBool>,
    // Version of the last reading published before the current session.
    session_base: Arc<AtomicU64>,
}

impl PitchFeed {
    /// Latest published reading.
    pub fn latest(&self) -> Arc<Reading> {
        self.readings.latest()
    }

    /// Number of readings published since the pipeline was created.
    pub fn version(&self) -> u64 {
        self.readings.version()
    }

    /// Whether a capture session is currently open.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Whether the current session has published a reading yet. Until it
    /// has, [`PitchFeed::latest`] still holds the previous session's last
    /// reading (or the initial one).
    pub fn has_session_reading(&self) -> bool {
        self.is_live() && self.version() > self.session_base.load(Ordering::Acquire)
    }

    /// Waits for a reading newer than `seen_version`.
    pub fn wait_for_update(&self, seen_version: u64, timeout: Duration) -> Option<(Arc<Reading>, u64)> {
        self.readings.wait_for_update(seen_version, timeout)
    }
}

impl LivePitch for PitchFeed {
    fn live_pitch(&self) -> Option<f32> {
        self.has_session_reading().then(|| self.latest().pitch_hz)
    }
}

/// Result of [`ProcessingPipeline::start`] when no device error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// A new session is running.
    Started { sample_rate: u32, window_size: usize },
    /// A session was already running; nothing changed.
    AlreadyRunning,
    /// Microphone access was refused; nothing was started.
    PermissionDenied,
}

/// Handle to the running worker thread.
struct AudioWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    fn is_finished(&self) -> bool {
        self.thread_handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("[PIPELINE] Capture worker panicked");
            }
        }
    }
}

/// Starts and stops capture sessions and publishes their readings.
pub struct ProcessingPipeline {
    config: EngineConfig,
    backend: Arc<dyn CaptureBackend>,
    publisher: Arc<Publisher<Reading>>,
    feed: PitchFeed,
    worker: Option<AudioWorker>,
}

impl ProcessingPipeline {
    pub fn new(config: EngineConfig, backend: Arc<dyn CaptureBackend>) -> Self {
        let (publisher, readings) = publish::channel(Reading::initial());
        Self {
            config,
            backend,
            publisher: Arc::new(publisher),
            feed: PitchFeed {
                readings,
                live: Arc::new(AtomicBool::new(false)),
                session_base: Arc::new(AtomicU64::new(0)),
            },
            worker: None,
        }
    }

    /// A reader of this pipeline's readings. Feeds stay valid across sessions.
    pub fn feed(&self) -> PitchFeed {
        self.feed.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.worker.is_some() && self.feed.is_live()
    }

    /// Opens the input device and starts the worker.
    ///
    /// # Returns
    /// * `Ok(StartStatus::Started { .. })` - Capture is running
    /// * `Ok(StartStatus::AlreadyRunning)` - No-op, a session is active
    /// * `Ok(StartStatus::PermissionDenied)` - No-op, access was refused
    /// * `Err(AudioError)` - The device could not be opened or started
    pub fn start(&mut self) -> Result<StartStatus, AudioError> {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                self.worker = Some(worker);
                return Ok(StartStatus::AlreadyRunning);
            }
            // The previous session ended on its own (device lost).
            worker.shutdown();
        }

        tracing::info!("[PIPELINE] Starting capture worker...");
        let (ready_tx, ready_rx) = bounded::<Result<(u32, usize), AudioError>>(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let config = self.config.clone();
        let backend = Arc::clone(&self.backend);
        let publisher = Arc::clone(&self.publisher);
        let feed = self.feed.clone();

        let thread_handle = thread::Builder::new()
            .name("pitch-capture".to_string())
            .spawn(move || {
                let (window_tx, window_rx) = bounded::<Vec<i16>>(config.channel_capacity.max(1));
                let stream = match backend.open_capture(&config, window_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let sample_rate = stream.sample_rate();
                let window_size = stream.window_size();

                let yin = Yin::new(sample_rate as f32).with_threshold(config.yin_threshold);
                let analyzer = SpectrumAnalyzer::new(sample_rate as f64);

                feed.session_base.store(feed.version(), Ordering::Release);
                feed.live.store(true, Ordering::Release);
                let _ = ready_tx.send(Ok((sample_rate, window_size)));

                tracing::debug!("[PIPELINE] Entering processing loop...");
                run_worker(&yin, &analyzer, &window_rx, &shutdown_rx, &publisher);

                feed.live.store(false, Ordering::Release);
                drop(stream);
                tracing::info!("[PIPELINE] Capture worker finished");
            })?;

        match ready_rx.recv() {
            Ok(Ok((sample_rate, window_size))) => {
                tracing::info!(
                    "[PIPELINE] Capture started at {} Hz, window of {} samples",
                    sample_rate,
                    window_size
                );
                self.worker = Some(AudioWorker {
                    shutdown_tx,
                    thread_handle: Some(thread_handle),
                });
                Ok(StartStatus::Started {
                    sample_rate,
                    window_size,
                })
            }
            Ok(Err(AudioError::PermissionDenied)) => {
                let _ = thread_handle.join();
                tracing::warn!("[PIPELINE] Microphone permission denied, not recording");
                Ok(StartStatus::PermissionDenied)
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                tracing::error!("[PIPELINE] Fatal error starting audio: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(AudioError::DeviceUnavailable(
                    "capture worker exited during startup".to_string(),
                ))
            }
        }
    }

    /// Stops the worker and releases the device. Returns whether a session
    /// was running.
    pub fn stop(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                tracing::info!("[PIPELINE] Shutting down capture worker...");
                worker.shutdown();
                true
            }
            None => false,
        }
    }
}

impl Drop for ProcessingPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Analyzes windows until shutdown is requested or the device goes away.
fn run_worker(
    yin: &Yin,
    analyzer: &SpectrumAnalyzer,
    windows: &Receiver<Vec<i16>>,
    shutdown: &Receiver<()>,
    publisher: &Publisher<Reading>,
) {
    loop {
        crossbeam_channel::select! {
            recv(windows) -> msg => match msg {
                Ok(window) => {
                    if window.is_empty() {
                        tracing::trace!("[PIPELINE] Empty window, skipping");
                        continue;
                    }
                    let reading = analyze_window(yin, analyzer, &window);
                    tracing::trace!("[PIPELINE] Pitch: {}", reading.pitch_hz);
                    publisher.publish(reading);
                },
                Err(_) => {
                    tracing::warn!("[PIPELINE] Capture channel closed");
                    break;
                },
            },
            recv(shutdown) -> _ => {
                tracing::debug!("[PIPELINE] Received shutdown signal");
                break;
            },
        }
    }
}
