//! # Pitch Detection Module
//!
//! This module implements the YIN fundamental-frequency estimator used on every
//! captured window of 16-bit microphone samples.
//!
//! ## Features
//! - Difference function over the first half of the window
//! - Cumulative mean normalized difference
//! - Absolute threshold search with local-minimum hunting
//! - Parabolic interpolation for sub-sample accuracy
//!
//! The estimator never fails: windows that are too short, silent or noisy
//! yield [`NO_PITCH`].

/// Sentinel returned when no pitch could be detected in a window.
pub const NO_PITCH: f32 = -1.0;

/// The YIN absolute threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.15;

/// Length of the YIN working buffer for an input window of `input_len` samples.
///
/// The lag range and the summation range of the difference function are both
/// `[0, input_len / 2)`, so the second half of the window is only ever read
/// through `samples[j + tau]`.
pub fn working_length(input_len: usize) -> usize {
    input_len / 2
}

/// Returns `true` when `hz` is an actual pitch rather than the sentinel.
pub fn is_pitched(hz: f32) -> bool {
    hz > 0.0
}

/// YIN pitch estimator bound to a fixed sample rate.
///
/// Each call to [`Yin::get_pitch`] allocates its own working buffer, so a
/// single estimator can be shared between threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Yin {
    sample_rate: f32,
    threshold: f32,
}

impl Yin {
    /// Creates an estimator for audio sampled at `sample_rate` Hz.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Overrides the absolute threshold (0.15 by default).
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Estimates the fundamental frequency of one window.
    ///
    /// # Arguments
    /// * `samples` - One window of 16-bit PCM samples
    ///
    /// # Returns
    /// * Frequency in Hz, or [`NO_PITCH`] when the threshold is never crossed
    pub fn get_pitch(&self, samples: &[i16]) -> f32 {
        let mut yin_buffer = difference(samples);
        cumulative_mean_normalized_difference(&mut yin_buffer);

        match absolute_threshold(&yin_buffer, self.threshold) {
            Some(tau_estimate) => {
                let better_tau = parabolic_interpolation(&yin_buffer, tau_estimate);
                self.sample_rate / better_tau
            }
            None => NO_PITCH,
        }
    }
}

/// Squared difference function.
///
/// `buffer[tau] = sum_{j < N} (x[j] - x[j + tau])^2` for `tau` in `[1, N)` with
/// `N = working_length(samples.len())`. `buffer[0]` stays zero.
pub fn difference(samples: &[i16]) -> Vec<f32> {
    let n = working_length(samples.len());
    let mut yin_buffer = vec![0.0f32; n];

    for tau in 1..n {
        let mut sum = 0.0f32;
        for j in 0..n {
            let delta = samples[j] as f32 - samples[j + tau] as f32;
            sum += delta * delta;
        }
        yin_buffer[tau] = sum;
    }
    yin_buffer
}

/// Cumulative mean normalized difference, applied in place.
///
/// `buffer[0]` and `buffer[1]` are pinned to 1. The running sum starts at the
/// raw `buffer[1]`, so normalization begins at `tau = 2`.
pub fn cumulative_mean_normalized_difference(yin_buffer: &mut [f32]) {
    if yin_buffer.is_empty() {
        return;
    }
    yin_buffer[0] = 1.0;
    if yin_buffer.len() < 2 {
        return;
    }

    let mut running_sum = yin_buffer[1];
    yin_buffer[1] = 1.0;
    for tau in 2..yin_buffer.len() {
        running_sum += yin_buffer[tau];
        // A zero running sum gives NaN here, which never passes the threshold.
        yin_buffer[tau] *= tau as f32 / running_sum;
    }
}

/// Finds the first lag whose value drops below `threshold`, then follows the
/// dip down to its local minimum.
///
/// # Returns
/// * `Some(tau)` - Integer period estimate
/// * `None` - The threshold was never crossed (unvoiced or noisy window)
pub fn absolute_threshold(yin_buffer: &[f32], threshold: f32) -> Option<usize> {
    let mut tau = 1;
    while tau < yin_buffer.len() {
        if yin_buffer[tau] < threshold {
            while tau + 1 < yin_buffer.len() && yin_buffer[tau + 1] < yin_buffer[tau] {
                tau += 1;
            }
            return Some(tau);
        }
        tau += 1;
    }
    None
}

/// Refines an integer lag with a parabola through its two neighbours.
///
/// At either edge of the buffer no parabola can be fitted; the better of the
/// estimate and its single neighbour is returned instead.
pub fn parabolic_interpolation(yin_buffer: &[f32], tau_estimate: usize) -> f32 {
    let x0 = if tau_estimate < 1 {
        tau_estimate
    } else {
        tau_estimate - 1
    };
    let x2 = if tau_estimate + 1 < yin_buffer.len() {
        tau_estimate + 1
    } else {
        tau_estimate
    };

    if x0 == tau_estimate {
        return if yin_buffer[tau_estimate] <= yin_buffer[x2] {
            tau_estimate as f32
        } else {
            x2 as f32
        };
    }
    if x2 == tau_estimate {
        return if yin_buffer[tau_estimate] <= yin_buffer[x0] {
            tau_estimate as f32
        } else {
            x0 as f32
        };
    }

    let s0 = yin_buffer[x0];
    let s1 = yin_buffer[tau_estimate];
    let s2 = yin_buffer[x2];
    tau_estimate as f32 + 0.5 * (s2 - s0) / (2.0 * s1 - s2 - s0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate;
                (16000.0 * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn working_length_is_half_the_window() {
        assert_eq!(working_length(0), 0);
        assert_eq!(working_length(1), 0);
        assert_eq!(working_length(2), 1);
        assert_eq!(working_length(1025), 512);
        assert_eq!(working_length(2048), 1024);
    }

    #[test]
    fn difference_sums_only_first_half() {
        // N = 2, tau = 1: (x0 - x1)^2 + (x1 - x2)^2; x3 is never read.
        let buffer = difference(&[0, 3, 7, 1000]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer[0], 0.0);
        assert_eq!(buffer[1], 9.0 + 16.0);
    }

    #[test]
    fn cmnd_pins_first_two_lags() {
        let mut buffer = vec![0.0, 4.0, 2.0, 6.0];
        cumulative_mean_normalized_difference(&mut buffer);
        assert_eq!(buffer[0], 1.0);
        assert_eq!(buffer[1], 1.0);
        // running sum 4 + 2 = 6, 2 * 2 / 6
        assert_relative_eq!(buffer[2], 2.0 / 3.0);
        // running sum 12, 6 * 3 / 12
        assert_relative_eq!(buffer[3], 1.5);
    }

    #[test]
    fn threshold_follows_dip_to_local_minimum() {
        let buffer = [1.0, 1.0, 0.5, 0.1, 0.05, 0.02, 0.3, 0.01];
        assert_eq!(absolute_threshold(&buffer, 0.15), Some(5));
        assert_eq!(absolute_threshold(&[1.0, 1.0, 0.9], 0.15), None);
    }

    #[test]
    fn interpolation_handles_edges() {
        let buffer = [1.0, 0.2, 0.1];
        // Right edge: estimate 2 has no right neighbour, 0.1 <= 0.2 keeps it.
        assert_eq!(parabolic_interpolation(&buffer, 2), 2.0);
        // Left edge: estimate 0, neighbour 1 is smaller.
        assert_eq!(parabolic_interpolation(&buffer, 0), 1.0);
    }

    #[test]
    fn interpolation_symmetric_dip_stays_put() {
        let buffer = [1.0, 0.5, 0.1, 0.5, 1.0];
        assert_relative_eq!(parabolic_interpolation(&buffer, 2), 2.0);
    }

    #[test]
    fn detects_440_in_1024_window() {
        let yin = Yin::new(44100.0);
        let pitch = yin.get_pitch(&sine(440.0, 44100.0, 1024));
        assert!((pitch - 440.0).abs() < 5.0, "got {pitch}");
    }

    #[test]
    fn silence_has_no_pitch() {
        let yin = Yin::new(44100.0);
        assert_eq!(yin.get_pitch(&[0i16; 64]), NO_PITCH);
        assert!(!is_pitched(NO_PITCH));
    }

    #[test]
    fn tiny_windows_do_not_panic() {
        let yin = Yin::new(44100.0);
        for len in 0..8 {
            let window: Vec<i16> = (0..len).map(|i| (i * 1000) as i16).collect();
            assert!(!yin.get_pitch(&window).is_nan());
        }
    }
}
