//! # Musical Tuning Module
//!
//! Turns a detected pitch into something a singer can read: the sargam
//! (swar) name of the nearest semitone relative to A4 = 440 Hz, its octave
//! number, and the deviation in cents.
//!
//! Semitones are counted from A, so A is `Dha`, C is `Sa` and so on through
//! the twelve names in [`SWAR_NAMES`]. The octave number follows scientific
//! pitch notation anchored on A4, i.e. `floor(log2(pitch / 440)) + 4`.

use once_cell::sync::Lazy;

/// Concert pitch used as the naming anchor.
pub const A4_FREQUENCY: f32 = 440.0;

/// Swar names of the twelve semitones, starting at A.
pub const SWAR_NAMES: [&str; 12] = [
    "Dha", "TDha", "Ni", "Sa", "TSa", "Re", "TRe", "Ga", "Ma", "TMa", "Pa", "TPa",
];

/// A named reading of a detected pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReading {
    /// Swar name of the nearest semitone.
    pub name: &'static str,
    /// Octave number, `floor(log2(pitch / 440)) + 4`.
    pub octave: i32,
    /// Frequency of the nearest equal-temperament semitone.
    pub target_frequency: f32,
    /// Deviation from `target_frequency`, positive when sharp.
    pub cents: f32,
}

/// One equal-temperament semitone.
#[derive(Debug, Clone)]
struct Semitone {
    name: &'static str,
    frequency: f32,
}

/// Semitones from A0 up to G#9, covering every octave band of the spectrum.
///
/// Computed once; index 48 is A4.
static SEMITONES: Lazy<Vec<Semitone>> = Lazy::new(|| {
    (0..12 * 10)
        .map(|i| Semitone {
            name: SWAR_NAMES[i % 12],
            frequency: A4_FREQUENCY * 2.0_f32.powf((i as f32 - 48.0) / 12.0),
        })
        .collect()
});

/// Names a detected pitch.
///
/// # Returns
/// * `Some(reading)` for a positive, finite pitch
/// * `None` for the "no pitch" sentinel, zero or non-finite input
pub fn describe_pitch(pitch: f32) -> Option<NoteReading> {
    if !(pitch.is_finite() && pitch > 0.0) {
        return None;
    }

    let semitones_from_a4 = 12.0 * (pitch / A4_FREQUENCY).log2();
    let index = (semitones_from_a4.round() as i64).rem_euclid(12) as usize;
    let octave = (pitch / A4_FREQUENCY).log2().floor() as i32 + 4;

    let (_, target_frequency) = find_nearest_semitone(pitch);
    Some(NoteReading {
        name: SWAR_NAMES[index],
        octave,
        target_frequency,
        cents: calculate_cents_deviation(pitch, target_frequency),
    })
}

/// Finds the equal-temperament semitone closest to `freq`.
///
/// # Returns
/// * `(swar_name, target_frequency)`
pub fn find_nearest_semitone(freq: f32) -> (&'static str, f32) {
    let closest = SEMITONES.iter().min_by(|a, b| {
        let diff_a = (a.frequency - freq).abs();
        let diff_b = (b.frequency - freq).abs();
        diff_a.total_cmp(&diff_b)
    });

    match closest {
        Some(semitone) => (semitone.name, semitone.frequency),
        None => (SWAR_NAMES[0], A4_FREQUENCY),
    }
}

/// Deviation of `freq` from `target_freq` in cents (100 per semitone).
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_is_dha_in_octave_four() {
        let reading = describe_pitch(440.0).unwrap();
        assert_eq!(reading.name, "Dha");
        assert_eq!(reading.octave, 4);
        assert_relative_eq!(reading.cents, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn middle_c_is_sa() {
        // C4 lies below A4, so its octave number is 3 under the A-anchored rule.
        let reading = describe_pitch(261.63).unwrap();
        assert_eq!(reading.name, "Sa");
        assert_eq!(reading.octave, 3);
        assert_relative_eq!(reading.target_frequency, 261.63, epsilon = 0.01);
    }

    #[test]
    fn sharp_reading_has_positive_cents() {
        let reading = describe_pitch(446.0).unwrap();
        assert_eq!(reading.name, "Dha");
        assert!(reading.cents > 20.0 && reading.cents < 25.0);
    }

    #[test]
    fn near_octave_wrap_rounds_back_to_dha() {
        // 11.6 semitones above A4 rounds to 12, which wraps to index 0.
        let reading = describe_pitch(440.0 * 2.0_f32.powf(11.6 / 12.0)).unwrap();
        assert_eq!(reading.name, "Dha");
        assert_eq!(reading.octave, 4);
    }

    #[test]
    fn no_reading_without_pitch() {
        assert!(describe_pitch(crate::pitch::NO_PITCH).is_none());
        assert!(describe_pitch(0.0).is_none());
        assert!(describe_pitch(f32::NAN).is_none());
    }
}
