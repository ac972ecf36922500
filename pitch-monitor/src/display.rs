//! # Console Display
//!
//! Formats pipeline readings as single status lines: raw and calibrated
//! pitch, the swar reading, and a bar per octave band.

use pitch_core::octave::{OCTAVE_COUNT, OctaveEnergy};
use pitch_core::tuning;

/// Characters used for octave bars, quietest first.
const BAR_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One status line for a reading.
///
/// # Arguments
/// * `raw_pitch` - Pitch as detected, possibly the "no pitch" sentinel
/// * `calibrated_pitch` - The same pitch with the calibration offset applied
/// * `energy` - Octave energies of the same window
pub fn status_line(raw_pitch: f32, calibrated_pitch: f32, energy: &OctaveEnergy) -> String {
    let pitch_part = match tuning::describe_pitch(raw_pitch) {
        Some(note) => format!(
            "{:>8.2} Hz  cal {:>8.2}  {:<4} {:>2}  {:+6.1}c",
            raw_pitch, calibrated_pitch, note.name, note.octave, note.cents
        ),
        None => format!("{:>8} Hz  cal {:>8}  {:<4} {:>2}  {:>7}", "--", "--", "-", "-", "-"),
    };
    format!("{}  |{}|", pitch_part, octave_bars(energy))
}

/// Renders octave percentages C0..C9 as a bar graph, scaled to the loudest band.
pub fn octave_bars(energy: &OctaveEnergy) -> String {
    let percentages = energy.percentages();
    let peak = percentages.iter().cloned().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return " ".repeat(OCTAVE_COUNT);
    }
    percentages
        .iter()
        .map(|&p| {
            let level = ((p / peak) * (BAR_LEVELS.len() - 1) as f32).round() as usize;
            BAR_LEVELS[level.min(BAR_LEVELS.len() - 1)]
        })
        .collect()
}

/// Header naming the octave columns of [`status_line`].
pub fn header() -> String {
    let labels: String = (0..OCTAVE_COUNT)
        .map(|i| OctaveEnergy::label(i).chars().last().unwrap_or(' '))
        .collect();
    format!(
        "{:>11}  {:>12}  {:<4} {:>2}  {:>7}  |{}|",
        "pitch", "calibrated", "swar", "oct", "cents", labels
    )
}
