//! # Fast Fourier Transform (FFT) Module
//!
//! Produces the magnitude spectrum shown next to the live pitch. Each window
//! of 16-bit samples is:
//! 1. normalized to `[-1, 1]`
//! 2. zero-padded to the next power of two
//! 3. transformed with a unitary forward FFT (RustFFT)
//! 4. reduced to magnitudes rounded to 3 decimal places
//!
//! The octave summary of that spectrum lives in [`crate::octave`].

use std::sync::Mutex;

use rustfft::{num_complex::Complex, FftPlanner};

use crate::octave::{self, OctaveEnergy};

/// Output of one [`SpectrumAnalyzer::analyze`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// One rounded magnitude per bin of the zero-padded transform.
    pub magnitudes: Vec<f64>,
    /// Percentage share of energy per octave C0..C9.
    pub octave_energy: OctaveEnergy,
}

impl Spectrum {
    /// The spectrum published before any window has been analyzed.
    pub fn empty() -> Self {
        Self {
            magnitudes: Vec::new(),
            octave_energy: OctaveEnergy::placeholder(),
        }
    }
}

/// Computes magnitude spectra and octave energies for capture windows.
///
/// FFT plans are cached per length; the cache never influences results.
pub struct SpectrumAnalyzer {
    sample_rate: f64,
    planner: Mutex<FftPlanner<f64>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Analyzes one window.
    ///
    /// # Arguments
    /// * `samples` - Window of 16-bit PCM samples (any length, including 0)
    ///
    /// # Returns
    /// * `Spectrum` - Rounded magnitudes plus the octave energy summary
    pub fn analyze(&self, samples: &[i16]) -> Spectrum {
        let normalized = normalize(samples);
        let padded = zero_pad_to_power_of_two(&normalized);
        let spectrum = self.forward_unitary(&padded);
        let magnitudes = spectrum_to_magnitudes(&spectrum);
        let octave_energy = octave::octave_energy(&magnitudes, self.sample_rate);

        Spectrum {
            magnitudes,
            octave_energy,
        }
    }

    /// Forward FFT scaled by `1 / sqrt(n)`.
    fn forward_unitary(&self, signal: &[f64]) -> Vec<Complex<f64>> {
        let len = signal.len();
        if len == 0 {
            return Vec::new();
        }

        let fft = {
            // A poisoned planner is still a valid cache.
            let mut planner = self
                .planner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            planner.plan_fft_forward(len)
        };

        let mut buffer: Vec<Complex<f64>> = signal
            .iter()
            .map(|&sample| Complex { re: sample, im: 0.0 })
            .collect();
        fft.process(&mut buffer);

        let scale = 1.0 / (len as f64).sqrt();
        for value in buffer.iter_mut() {
            *value *= scale;
        }
        buffer
    }
}

/// Maps 16-bit samples onto `[-1, 1]` by dividing by `i16::MAX`.
///
/// `i16::MIN` lands marginally below -1.
pub fn normalize(samples: &[i16]) -> Vec<f64> {
    samples
        .iter()
        .map(|&s| s as f64 / i16::MAX as f64)
        .collect()
}

/// Copies `signal` into a zero-filled buffer whose length is the next power of
/// two (the same length when it already is one).
pub fn zero_pad_to_power_of_two(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mut padded = vec![0.0; signal.len().next_power_of_two()];
    padded[..signal.len()].copy_from_slice(signal);
    padded
}

/// Magnitude of every coefficient, rounded to 3 decimal places.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f64>]) -> Vec<f64> {
    spectrum
        .iter()
        .map(|c| round_to_millis((c.re * c.re + c.im * c.im).sqrt()))
        .collect()
}

fn round_to_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalize_divides_by_max_amplitude() {
        let out = normalize(&[0, i16::MAX, -i16::MAX, 16384]);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 1.0);
        assert_eq!(out[2], -1.0);
        assert_relative_eq!(out[3], 16384.0 / 32767.0);
    }

    #[test]
    fn pads_to_next_power_of_two() {
        assert_eq!(zero_pad_to_power_of_two(&[1.0; 1000]).len(), 1024);
        assert_eq!(zero_pad_to_power_of_two(&[1.0; 1024]).len(), 1024);
        assert_eq!(zero_pad_to_power_of_two(&[1.0; 3]), vec![1.0, 1.0, 1.0, 0.0]);
        assert!(zero_pad_to_power_of_two(&[]).is_empty());
    }

    #[test]
    fn unitary_dc_magnitude() {
        // A constant of 1.0 over n samples puts sqrt(n) into bin 0.
        let analyzer = SpectrumAnalyzer::new(44100.0);
        let spectrum = analyzer.analyze(&[i16::MAX; 16]);
        assert_relative_eq!(spectrum.magnitudes[0], 4.0);
        assert!(spectrum.magnitudes[1..].iter().all(|&m| m == 0.0));
    }

    #[test]
    fn magnitudes_are_rounded() {
        let c = [Complex { re: 0.12345, im: 0.0 }, Complex { re: 0.3, im: 0.4 }];
        assert_eq!(spectrum_to_magnitudes(&c), vec![0.123, 0.5]);
    }

    #[test]
    fn empty_window_yields_placeholder() {
        let analyzer = SpectrumAnalyzer::new(44100.0);
        let spectrum = analyzer.analyze(&[]);
        assert!(spectrum.magnitudes.is_empty());
        assert_eq!(spectrum.octave_energy, OctaveEnergy::placeholder());
    }
}
