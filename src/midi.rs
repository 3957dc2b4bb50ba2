// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! MIDI note helpers: naming, frequency conversion and export file naming.

use std::ops::RangeInclusive;

/// The lowest note on an 88-key piano (A0).
pub const PIANO_MIN: u8 = 21;

/// The highest note on an 88-key piano (C8).
pub const PIANO_MAX: u8 = 108;

/// The full piano keyboard range.
pub const PIANO_RANGE: RangeInclusive<u8> = PIANO_MIN..=PIANO_MAX;

const A4_MIDI: f64 = 69.0;
const A4_FREQUENCY: f64 = 440.0;
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Returns true if the note lies on the piano keyboard.
pub fn is_piano_note(note: u8) -> bool {
    PIANO_RANGE.contains(&note)
}

/// Returns the scientific pitch name of the note, e.g. 60 -> "C4".
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

/// Equal-tempered frequency of the note with A4 = 440 Hz.
pub fn note_to_frequency(note: u8) -> f64 {
    A4_FREQUENCY * 2f64.powf((note as f64 - A4_MIDI) / 12.0)
}

/// Half a semitone below A0: the lowest frequency that still rounds to a piano note.
pub fn lowest_piano_frequency() -> f64 {
    note_to_frequency(PIANO_MIN) * 2f64.powf(-1.0 / 24.0)
}

/// Half a semitone above C8: the highest frequency that still rounds to a piano note.
pub fn highest_piano_frequency() -> f64 {
    note_to_frequency(PIANO_MAX) * 2f64.powf(1.0 / 24.0)
}

/// Converts a frequency to the nearest note, clamped to the piano range.
/// Returns None for non-positive or non-finite frequencies.
pub fn frequency_to_note(frequency: f64) -> Option<u8> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    let note = (A4_MIDI + 12.0 * (frequency / A4_FREQUENCY).log2()).round();
    Some(note.clamp(PIANO_MIN as f64, PIANO_MAX as f64) as u8)
}

/// The sample rate tag used in exported file names.
pub fn sample_rate_suffix(sample_rate: u32) -> String {
    match sample_rate {
        44100 => "f44".to_string(),
        48000 => "f48".to_string(),
        96000 => "f96".to_string(),
        other => format!("f{:02}", other / 1000),
    }
}

/// Deterministic export file name for a mapping slot: `m060-vel3-f44.wav`.
pub fn export_filename(note: u8, velocity_layer: u8, sample_rate: u32, extension: &str) -> String {
    format!(
        "m{:03}-vel{}-{}.{}",
        note,
        velocity_layer,
        sample_rate_suffix(sample_rate),
        extension
    )
}
