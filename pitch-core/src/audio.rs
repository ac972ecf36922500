//! # Audio Device Module
//!
//! This module is the boundary between the pitch core and the sound hardware.
//! It defines the capture and playback traits the pipeline and calibrator are
//! written against, and implements both with CPAL (Cross-Platform Audio
//! Library).
//!
//! ## Features
//! - Default input/output device selection
//! - Mono 16-bit PCM preferred, `f32`/`u16` and multi-channel configs accepted
//! - Window sizing from the device's minimum buffer size recommendation
//! - Static (fully pre-rendered) playback with an end-of-buffer marker event

use std::any::Any;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, SupportedBufferSize, SupportedStreamConfigRange};
use crossbeam_channel::{Sender, TrySendError};

use crate::config::EngineConfig;
use crate::error::AudioError;

/// An open capture stream.
///
/// Windows are delivered on the channel given to
/// [`CaptureBackend::open_capture`]. Dropping this value stops the stream and
/// releases the device, so it must be dropped on the thread that opened it.
pub struct CaptureStream {
    sample_rate: u32,
    window_size: usize,
    _device: Box<dyn Any>,
}

impl CaptureStream {
    /// Wraps a device handle whose `Drop` releases the device.
    pub fn new(sample_rate: u32, window_size: usize, device: impl Any) -> Self {
        Self {
            sample_rate,
            window_size,
            _device: Box::new(device),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

/// Source of microphone windows.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Opens the input device and starts delivering fixed-size windows.
    ///
    /// A full `windows` channel drops the newest window rather than blocking
    /// the device callback.
    fn open_capture(
        &self,
        config: &EngineConfig,
        windows: Sender<Vec<i16>>,
    ) -> Result<CaptureStream, AudioError>;
}

/// Progress notifications of a static playback.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The play position reached the last sample.
    Completed,
    /// The output stream reported an error.
    Failed(String),
}

/// An open playback stream. Dropping it stops playback and releases the
/// device.
pub struct PlaybackStream {
    _device: Box<dyn Any>,
}

impl PlaybackStream {
    pub fn new(device: impl Any) -> Self {
        Self {
            _device: Box::new(device),
        }
    }
}

/// Sink for the calibration tone.
pub trait PlaybackBackend: Send + Sync {
    /// Starts playing `samples` once. [`PlaybackEvent::Completed`] is sent on
    /// `events` when every sample has been handed to the device.
    fn play_static(
        &self,
        samples: Vec<i16>,
        sample_rate: u32,
        events: Sender<PlaybackEvent>,
    ) -> Result<PlaybackStream, AudioError>;
}

/// Splits the device's sample stream into fixed-size mono windows.
///
/// Only the first channel of each interleaved frame is kept.
pub struct WindowAccumulator {
    window_size: usize,
    channels: usize,
    pending: Vec<i16>,
    sender: Sender<Vec<i16>>,
    dropped: u64,
}

impl WindowAccumulator {
    pub fn new(window_size: usize, channels: usize, sender: Sender<Vec<i16>>) -> Self {
        Self {
            window_size: window_size.max(1),
            channels: channels.max(1),
            pending: Vec::with_capacity(window_size * 2),
            sender,
            dropped: 0,
        }
    }

    /// Appends interleaved device samples and emits every complete window.
    pub fn push<T>(&mut self, data: &[T])
    where
        T: Copy,
        i16: FromSample<T>,
    {
        self.pending.extend(
            data.chunks(self.channels)
                .map(|frame| i16::from_sample(frame[0])),
        );

        while self.pending.len() >= self.window_size {
            let window: Vec<i16> = self.pending.drain(..self.window_size).collect();
            match self.sender.try_send(window) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    tracing::trace!("[AUDIO] Window channel full, dropped {} so far", self.dropped);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }

    /// Number of windows discarded because the consumer was behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Play cursor of a static buffer, with an end-of-buffer marker.
pub struct ToneCursor {
    samples: Vec<i16>,
    position: usize,
    channels: usize,
    events: Sender<PlaybackEvent>,
    marker_reached: bool,
}

impl ToneCursor {
    pub fn new(samples: Vec<i16>, channels: usize, events: Sender<PlaybackEvent>) -> Self {
        Self {
            samples,
            position: 0,
            channels: channels.max(1),
            events,
            marker_reached: false,
        }
    }

    /// Fills one device buffer, writing every sample to all channels and
    /// silence once the buffer is exhausted.
    pub fn fill<T>(&mut self, out: &mut [T])
    where
        T: Sample + FromSample<i16>,
    {
        for frame in out.chunks_mut(self.channels) {
            let value = match self.samples.get(self.position) {
                Some(&sample) => {
                    self.position += 1;
                    sample
                }
                None => 0,
            };
            let value = T::from_sample(value);
            for slot in frame.iter_mut() {
                *slot = value;
            }
        }

        if !self.marker_reached && self.position >= self.samples.len() {
            self.marker_reached = true;
            let _ = self.events.send(PlaybackEvent::Completed);
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// CPAL implementation of both device boundaries, using the default host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Pauses the stream before releasing it.
struct ActiveStream(cpal::Stream);

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if let Err(e) = self.0.pause() {
            tracing::warn!("[AUDIO] Error pausing stream: {}", e);
        }
    }
}

impl CaptureBackend for CpalBackend {
    fn open_capture(
        &self,
        config: &EngineConfig,
        windows: Sender<Vec<i16>>,
    ) -> Result<CaptureStream, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoDevice("input"))?;

        tracing::info!("[AUDIO] Using audio input device: {}", device_name(&device));

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported = find_supported_config(configs, config.sample_rate).ok_or_else(|| {
            AudioError::UnsupportedConfig(format!(
                "no i16/f32/u16 input format at {} Hz",
                config.sample_rate
            ))
        })?;

        let window_size = config.resolve_window_size(min_buffer_size(&supported));
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported
            .with_sample_rate(cpal::SampleRate(config.sample_rate))
            .into();

        tracing::debug!(
            "[AUDIO] Capture config: {:?}, {} channel(s), window of {} samples",
            sample_format,
            stream_config.channels,
            window_size
        );

        let accumulator =
            WindowAccumulator::new(window_size, stream_config.channels as usize, windows);
        let stream = match sample_format {
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &stream_config, accumulator)?,
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &stream_config, accumulator)?,
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &stream_config, accumulator)?,
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "sample format {other:?}"
                )));
            }
        };

        stream.play()?;
        Ok(CaptureStream::new(
            config.sample_rate,
            window_size,
            ActiveStream(stream),
        ))
    }
}

impl PlaybackBackend for CpalBackend {
    fn play_static(
        &self,
        samples: Vec<i16>,
        sample_rate: u32,
        events: Sender<PlaybackEvent>,
    ) -> Result<PlaybackStream, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoDevice("output"))?;

        tracing::info!("[AUDIO] Using audio output device: {}", device_name(&device));

        let configs = device.supported_output_configs()?.collect::<Vec<_>>();
        let supported = find_supported_config(configs, sample_rate).ok_or_else(|| {
            AudioError::UnsupportedConfig(format!(
                "no i16/f32/u16 output format at {} Hz",
                sample_rate
            ))
        })?;

        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig =
            supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();
        let cursor = ToneCursor::new(samples, stream_config.channels as usize, events.clone());

        let stream = match sample_format {
            SampleFormat::I16 => build_playback_stream::<i16>(&device, &stream_config, cursor, events)?,
            SampleFormat::F32 => build_playback_stream::<f32>(&device, &stream_config, cursor, events)?,
            SampleFormat::U16 => build_playback_stream::<u16>(&device, &stream_config, cursor, events)?,
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "sample format {other:?}"
                )));
            }
        };

        stream.play()?;
        Ok(PlaybackStream::new(ActiveStream(stream)))
    }
}

fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut accumulator: WindowAccumulator,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let err_fn = |err| tracing::warn!("[AUDIO] An error occurred on the input stream: {}", err);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| accumulator.push(data),
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn build_playback_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut cursor: ToneCursor,
    events: Sender<PlaybackEvent>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("[AUDIO] An error occurred on the output stream: {}", err);
        let _ = events.send(PlaybackEvent::Failed(err.to_string()));
    };
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| cursor.fill(data),
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "<unnamed>".to_string())
}

/// Preference order of sample formats; `None` for formats we do not convert.
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Finds the best supported configuration for the target sample rate.
///
/// Only ranges containing `target_rate` in a convertible format qualify.
/// Among those, fewer channels win, then 16-bit integer over float.
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - No suitable configuration found
pub fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0)
        .filter_map(|c| format_rank(c.sample_format()).map(|rank| (c, rank)))
        .min_by_key(|(c, rank)| (c.channels(), *rank))
        .map(|(c, _)| c)
}

/// The device's minimum buffer size, used as the latency-driven window length.
pub fn min_buffer_size(config: &SupportedStreamConfigRange) -> Option<u32> {
    match config.buffer_size() {
        SupportedBufferSize::Range { min, .. } => Some(*min),
        SupportedBufferSize::Unknown => None,
    }
}
