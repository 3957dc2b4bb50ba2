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
use std::{error::Error, fs::File, path::PathBuf};

use chrono::Utc;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::analysis::{PitchDetector, PitchEstimate};
use crate::sample::{AnalysisRecord, PitchMethod, Sample};

/// A pitch detector that always reports the same note.
pub struct FixedPitch(pub Option<u8>);

impl PitchDetector for FixedPitch {
    fn detect(&self, _mono: &[f32], _sample_rate: u32) -> PitchEstimate {
        match self.0 {
            Some(midi) => PitchEstimate {
                frequency: Some(crate::midi::note_to_frequency(midi)),
                midi: Some(midi),
                confidence: 0.9,
                method: PitchMethod::Model,
            },
            None => PitchEstimate::none(),
        }
    }
}

/// A fully analyzed in-memory sample with a hash derived from its path.
pub fn analyzed_sample(path: &str, midi: u8, velocity_amplitude: f64) -> Sample {
    let mut sample = Sample::new(PathBuf::from(path));
    sample.set_hash(format!("hash-{}", path));
    sample.apply_record(AnalysisRecord {
        filename: crate::util::filename_display(sample.path()).to_string(),
        file_path: path.to_string(),
        detected_midi: Some(midi),
        velocity_amplitude: Some(velocity_amplitude),
        analyzed_timestamp: Some(Utc::now()),
        ..Default::default()
    });
    sample
}

/// Writes a 32-bit WAV file. Each inner Vec is one channel; channels are interleaved on write.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<Vec<S>>,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    write_wav_with_bits(path, samples, sample_rate, 32)
}

pub fn write_wav_with_bits<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<Vec<S>>,
    sample_rate: u32,
    bits_per_sample: u16,
) -> Result<(), Box<dyn Error>> {
    let tempwav = File::create(path)?;

    // Determine sample format based on the type
    let sample_format = if std::any::TypeId::of::<S>() == std::any::TypeId::of::<f32>() {
        SampleFormat::Float
    } else if std::any::TypeId::of::<S>() == std::any::TypeId::of::<i32>()
        || std::any::TypeId::of::<S>() == std::any::TypeId::of::<i16>()
    {
        SampleFormat::Int
    } else {
        return Err("Unsupported sample format".into());
    };

    let num_channels = samples.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let frames = samples.iter().map(|c| c.len()).min().unwrap_or(0);
    let mut writer = WavWriter::new(
        tempwav,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample,
            sample_format,
        },
    )?;

    for frame in 0..frames {
        for channel_samples in &samples {
            writer.write_sample(channel_samples[frame])?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Writes a mono float WAV containing a sine wave.
pub fn write_sine_wav(
    path: PathBuf,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    duration_seconds: f32,
) -> Result<(), Box<dyn Error>> {
    let samples = audio_test_utils::sine(frequency, amplitude, sample_rate, duration_seconds);
    write_wav(path, vec![samples], sample_rate)
}

/// Audio test utilities for generating test signals and validating results
pub mod audio_test_utils {
    use std::f32::consts::PI;

    /// Generate a sine wave of the given amplitude.
    pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32, duration_seconds: f32) -> Vec<f32> {
        let sample_count = (sample_rate as f32 * duration_seconds) as usize;
        (0..sample_count)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    /// Generate deterministic pseudo-random noise in [-amplitude, amplitude].
    pub fn noise(amplitude: f32, sample_count: usize, seed: u32) -> Vec<f32> {
        let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
        (0..sample_count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                amplitude * ((state as f32 / u32::MAX as f32) * 2.0 - 1.0)
            })
            .collect()
    }

    /// Calculate RMS (Root Mean Square) of a signal
    pub fn calculate_rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }
}
