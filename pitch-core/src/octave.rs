//! Octave energy summary of a magnitude spectrum.
//!
//! The spectrum is split into the ten octaves C0..C9 and each octave's mean
//! magnitude is expressed as a percentage of the sum over all octaves.

/// Number of octave bands.
pub const OCTAVE_COUNT: usize = 10;

/// `(low, high)` boundaries in Hz of octaves C0 through C9.
pub const OCTAVE_BANDS: [(f64, f64); OCTAVE_COUNT] = [
    (16.35, 32.70),
    (32.70, 65.41),
    (65.41, 130.81),
    (130.81, 261.63),
    (261.63, 523.25),
    (523.25, 1046.50),
    (1046.50, 2093.00),
    (2093.00, 4186.01),
    (4186.01, 8372.02),
    (8372.02, 16744.04),
];

/// Shown while there is no usable spectrum yet.
const PLACEHOLDER: [f32; OCTAVE_COUNT] = [
    100.0, 80.0, 60.0, 40.0, 20.0, 20.0, 40.0, 60.0, 80.0, 100.0,
];

/// Smallest spectrum that is binned; anything shorter gets the placeholder.
const MIN_BINS: usize = 3;

/// Percentage of spectral energy per octave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctaveEnergy(pub [f32; OCTAVE_COUNT]);

impl OctaveEnergy {
    /// Fixed fallback pattern for degenerate spectra.
    pub fn placeholder() -> Self {
        Self(PLACEHOLDER)
    }

    /// All octaves at zero, used when the spectrum carries no energy.
    pub fn silent() -> Self {
        Self([0.0; OCTAVE_COUNT])
    }

    pub fn percentages(&self) -> &[f32; OCTAVE_COUNT] {
        &self.0
    }

    pub fn total(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Label of an octave band, e.g. `"C4"`.
    pub fn label(octave: usize) -> String {
        format!("C{}", octave)
    }
}

/// Converts a frequency to a bin of an `fft_size`-point transform.
///
/// `round(freq * fft_size / sample_rate)`, clamped to `[0, fft_size / 2]`.
pub fn frequency_to_bin(freq: f64, fft_size: usize, sample_rate: f64) -> usize {
    let bin = (freq * fft_size as f64 / sample_rate).round();
    let nyquist = (fft_size / 2) as f64;
    bin.clamp(0.0, nyquist) as usize
}

/// Summarizes `magnitudes` into octave percentages.
///
/// # Returns
/// * Percentages summing to 100 when the octaves carry energy
/// * [`OctaveEnergy::silent`] when their total is zero
/// * [`OctaveEnergy::placeholder`] for spectra shorter than three bins or
///   starting with NaN
pub fn octave_energy(magnitudes: &[f64], sample_rate: f64) -> OctaveEnergy {
    if magnitudes.len() < MIN_BINS || magnitudes[0].is_nan() {
        return OctaveEnergy::placeholder();
    }

    let fft_size = magnitudes.len();
    let averages: Vec<f64> = OCTAVE_BANDS
        .iter()
        .map(|&(low, high)| {
            let start = frequency_to_bin(low, fft_size, sample_rate);
            let end = frequency_to_bin(high, fft_size, sample_rate);
            band_average(magnitudes, start, end)
        })
        .collect();

    let total: f64 = averages.iter().sum();
    if total.is_nan() || total <= 0.0 {
        return OctaveEnergy::silent();
    }

    let mut percentages = [0.0f32; OCTAVE_COUNT];
    for (slot, average) in percentages.iter_mut().zip(&averages) {
        *slot = (average / total * 100.0) as f32;
    }
    OctaveEnergy(percentages)
}

/// Mean absolute magnitude over `[start, end)`; an empty band counts as zero.
fn band_average(magnitudes: &[f64], start: usize, end: usize) -> f64 {
    if end <= start {
        return 0.0;
    }
    let band = &magnitudes[start..end];
    band.iter().map(|m| m.abs()).sum::<f64>() / band.len() as f64
}
