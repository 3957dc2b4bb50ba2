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
//! Decoding of audio files into in-memory waveforms for analysis.

use std::path::Path;
use std::time::Duration;

mod decoder;
mod error;

pub use decoder::SymphoniaLoader;
pub use error::LoadError;

/// A fully decoded audio file. Samples are interleaved f32 in [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedAudio {
    /// Creates decoded audio from interleaved samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> DecodedAudio {
        DecodedAudio {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Creates single channel audio.
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> DecodedAudio {
        DecodedAudio::new(samples, sample_rate, 1)
    }

    /// Gets the interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration of the decoded audio.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Downmixes to mono by averaging channels.
    pub fn mono(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Turns a file path into decoded audio.
pub trait AudioLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<DecodedAudio, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_downmix() {
        let audio = DecodedAudio::new(vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 48000, 2);
        assert_eq!(3, audio.frames());
        assert_eq!(vec![0.5, 0.5, 0.0], audio.mono());
    }

    #[test]
    fn test_duration() {
        let audio = DecodedAudio::from_mono(vec![0.0; 22050], 44100);
        assert_eq!(Duration::from_millis(500), audio.duration());
        assert_eq!(Duration::ZERO, DecodedAudio::from_mono(vec![], 0).duration());
    }
}
