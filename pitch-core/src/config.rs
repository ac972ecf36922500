//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration.

use serde::{Deserialize, Serialize};

/// Fixed capture and playback rate.
pub const SAMPLE_RATE: u32 = 44100;

/// Window length used when the device gives no buffer size recommendation.
pub const DEFAULT_WINDOW_SIZE: usize = 2048;

/// Bounds applied to the device's recommended window length.
pub const MIN_WINDOW_SIZE: usize = 1024;
pub const MAX_WINDOW_SIZE: usize = 8192;

/// Reference tone for calibration (A4).
pub const REFERENCE_A4: f32 = 440.0;

/// Calibration tone length in seconds.
pub const CALIBRATION_DURATION: f32 = 2.0;

/// Longest calibration tone that will be rendered, in seconds.
pub const MAX_CALIBRATION_SECONDS: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capture/playback sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per analysis window. `None` follows the device recommendation.
    pub window_size: Option<usize>,
    /// YIN absolute threshold.
    pub yin_threshold: f32,
    /// Windows buffered between the capture callback and the worker.
    pub channel_capacity: usize,
    /// Calibration reference frequency in Hz.
    pub reference_frequency: f32,
    /// Calibration tone duration in seconds.
    pub calibration_seconds: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            window_size: None,
            yin_threshold: crate::pitch::DEFAULT_THRESHOLD,
            channel_capacity: 4,
            reference_frequency: REFERENCE_A4,
            calibration_seconds: CALIBRATION_DURATION,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON configuration, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Picks the analysis window length.
    ///
    /// An explicit `window_size` wins. Otherwise the device's minimum buffer
    /// size is used, clamped to `[MIN_WINDOW_SIZE, MAX_WINDOW_SIZE]`, with
    /// [`DEFAULT_WINDOW_SIZE`] when the device does not say.
    pub fn resolve_window_size(&self, device_min_buffer: Option<u32>) -> usize {
        if let Some(size) = self.window_size {
            return size.max(1);
        }
        match device_min_buffer {
            Some(min) => (min as usize).clamp(MIN_WINDOW_SIZE, MAX_WINDOW_SIZE),
            None => DEFAULT_WINDOW_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = EngineConfig::from_json(r#"{ "window_size": 4096 }"#).unwrap();
        assert_eq!(config.window_size, Some(4096));
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.yin_threshold, 0.15);
    }

    #[test]
    fn window_size_resolution() {
        let config = EngineConfig::default();
        assert_eq!(config.resolve_window_size(None), 2048);
        assert_eq!(config.resolve_window_size(Some(64)), 1024);
        assert_eq!(config.resolve_window_size(Some(3528)), 3528);
        assert_eq!(config.resolve_window_size(Some(1 << 20)), 8192);

        let fixed = EngineConfig {
            window_size: Some(512),
            ..EngineConfig::default()
        };
        assert_eq!(fixed.resolve_window_size(Some(4096)), 512);
    }
}
