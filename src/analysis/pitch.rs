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
//! Fundamental frequency estimation.
//!
//! The primary estimator runs YIN (cumulative mean normalised difference) over a set of
//! evenly spaced frames and combines the per-frame results around their median. When it
//! is not confident, a normalised autocorrelation over the loudest frame is tried.

use std::time::Duration;

use tracing::debug;

use crate::midi;
use crate::sample::PitchMethod;

/// Signals shorter than this after truncation are not analysed.
const MIN_SIGNAL_SAMPLES: usize = 1024;
const NORMALIZE_PEAK: f64 = 0.8;
const HIGH_PASS_ALPHA: f64 = 0.98;
/// Absolute threshold for accepting the first CMNDF dip.
const YIN_THRESHOLD: f64 = 0.1;
/// Frames at or below this confidence are ignored.
const MIN_FRAME_CONFIDENCE: f64 = 0.1;
/// Frames further than this fraction from the median frequency are outliers.
const MEDIAN_TOLERANCE: f64 = 0.1;

/// Tunables for pitch detection.
#[derive(Clone, Debug, PartialEq)]
pub struct PitchParams {
    /// Only this much of the start of the signal is inspected.
    pub window: Duration,
    pub min_frequency: f64,
    pub max_frequency: f64,
    /// The model estimate is accepted above this confidence.
    pub confidence_threshold: f64,
    /// The fallback estimate is accepted at or above this correlation.
    pub fallback_threshold: f64,
    pub max_frames: usize,
}

impl Default for PitchParams {
    fn default() -> Self {
        PitchParams {
            window: Duration::from_secs(5),
            min_frequency: midi::lowest_piano_frequency(),
            max_frequency: midi::highest_piano_frequency(),
            confidence_threshold: 0.5,
            fallback_threshold: 0.3,
            max_frames: 48,
        }
    }
}

/// The result of pitch detection on one signal.
#[derive(Clone, Debug, PartialEq)]
pub struct PitchEstimate {
    pub frequency: Option<f64>,
    pub midi: Option<u8>,
    pub confidence: f64,
    pub method: PitchMethod,
}

impl PitchEstimate {
    /// No usable pitch.
    pub fn none() -> PitchEstimate {
        PitchEstimate {
            frequency: None,
            midi: None,
            confidence: 0.0,
            method: PitchMethod::None,
        }
    }

    fn found(frequency: f64, confidence: f64, method: PitchMethod) -> PitchEstimate {
        PitchEstimate {
            frequency: Some(frequency),
            midi: midi::frequency_to_note(frequency),
            confidence,
            method,
        }
    }
}

/// Estimates the pitch of a mono signal.
pub trait PitchDetector: Send + Sync {
    fn detect(&self, mono: &[f32], sample_rate: u32) -> PitchEstimate;
}

/// YIN with an autocorrelation fallback.
#[derive(Clone, Debug, Default)]
pub struct YinDetector {
    params: PitchParams,
}

impl YinDetector {
    pub fn new(params: PitchParams) -> YinDetector {
        YinDetector { params }
    }

    pub fn params(&self) -> &PitchParams {
        &self.params
    }

    /// Truncates, peak-normalises and DC-blocks the signal.
    fn preprocess(&self, mono: &[f32], sample_rate: u32) -> Option<Vec<f64>> {
        let limit = (self.params.window.as_secs_f64() * sample_rate as f64) as usize;
        let signal = &mono[..mono.len().min(limit)];
        if signal.len() < MIN_SIGNAL_SAMPLES {
            return None;
        }

        let peak = signal.iter().fold(0.0f64, |acc, s| acc.max(s.abs() as f64));
        if peak <= f64::EPSILON {
            return None;
        }
        let gain = NORMALIZE_PEAK / peak;

        let mut output = Vec::with_capacity(signal.len());
        let mut prev_in = 0.0;
        let mut prev_out = 0.0;
        for &sample in signal {
            let x = sample as f64 * gain;
            let y = HIGH_PASS_ALPHA * (prev_out + x - prev_in);
            prev_in = x;
            prev_out = y;
            output.push(y);
        }
        Some(output)
    }

    /// Half of the analysis frame: long enough to hold two periods of the lowest frequency.
    fn half_window(&self, len: usize, sample_rate: u32) -> usize {
        let wanted = (sample_rate as f64 / self.params.min_frequency).ceil() as usize + 2;
        wanted.min(len / 2)
    }

    fn tau_bounds(&self, half: usize, sample_rate: u32) -> Option<(usize, usize)> {
        let min_tau = ((sample_rate as f64 / self.params.max_frequency).floor() as usize).max(2);
        let max_tau = ((sample_rate as f64 / self.params.min_frequency).ceil() as usize)
            .min(half.saturating_sub(2));
        (min_tau < max_tau).then_some((min_tau, max_tau))
    }

    /// Runs YIN on one frame of `2 * half` samples; returns (frequency, confidence).
    fn yin_frame(&self, frame: &[f64], half: usize, sample_rate: u32) -> Option<(f64, f64)> {
        let (min_tau, max_tau) = self.tau_bounds(half, sample_rate)?;

        let mut cmndf = vec![1.0; half];
        let mut running_sum = 0.0;
        for tau in 1..half {
            let diff: f64 = (0..half)
                .map(|j| {
                    let d = frame[j] - frame[j + tau];
                    d * d
                })
                .sum();
            running_sum += diff;
            cmndf[tau] = if running_sum > 0.0 {
                diff * tau as f64 / running_sum
            } else {
                1.0
            };
        }

        let mut best = None;
        for tau in min_tau..=max_tau {
            if cmndf[tau] < YIN_THRESHOLD {
                let mut tau = tau;
                while tau < max_tau && cmndf[tau + 1] < cmndf[tau] {
                    tau += 1;
                }
                best = Some(tau);
                break;
            }
        }
        let tau = match best {
            Some(tau) => tau,
            None => (min_tau..=max_tau).min_by(|a, b| cmndf[*a].total_cmp(&cmndf[*b]))?,
        };

        let confidence = 1.0 - cmndf[tau].min(1.0);
        let frequency = sample_rate as f64 / parabolic_interpolation(&cmndf, tau);
        if !(self.params.min_frequency..=self.params.max_frequency).contains(&frequency) {
            return None;
        }
        Some((frequency, confidence))
    }

    /// YIN over evenly spaced frames combined around the median frequency.
    fn model_estimate(&self, signal: &[f64], sample_rate: u32) -> Option<(f64, f64)> {
        let half = self.half_window(signal.len(), sample_rate);
        let frame_len = half * 2;
        if frame_len == 0 {
            return None;
        }
        let span = signal.len() - frame_len;
        let frames = self.params.max_frames.min(span / half.max(1) + 1).max(1);

        let mut estimates: Vec<(f64, f64)> = (0..frames)
            .filter_map(|i| {
                let start = if frames > 1 { span * i / (frames - 1) } else { 0 };
                self.yin_frame(&signal[start..start + frame_len], half, sample_rate)
            })
            .filter(|(_, confidence)| *confidence > MIN_FRAME_CONFIDENCE)
            .collect();
        if estimates.is_empty() {
            return None;
        }

        estimates.sort_by(|a, b| a.0.total_cmp(&b.0));
        let median = estimates[estimates.len() / 2].0;
        let kept: Vec<&(f64, f64)> = estimates
            .iter()
            .filter(|(frequency, _)| (frequency - median).abs() <= median * MEDIAN_TOLERANCE)
            .collect();

        let weight: f64 = kept.iter().map(|(_, c)| c).sum();
        if weight <= 0.0 {
            return None;
        }
        let frequency = kept.iter().map(|(f, c)| f * c).sum::<f64>() / weight;
        let confidence = weight / kept.len() as f64;
        debug!(
            frames,
            kept = kept.len(),
            frequency,
            confidence,
            "YIN estimate"
        );
        Some((frequency, confidence))
    }

    /// Normalised autocorrelation over the loudest frame; returns (frequency, correlation).
    fn fallback_estimate(&self, signal: &[f64], sample_rate: u32) -> Option<(f64, f64)> {
        let half = self.half_window(signal.len(), sample_rate);
        let frame_len = half * 2;
        let (min_tau, max_tau) = self.tau_bounds(half, sample_rate)?;

        let hop = half.max(1);
        let start = (0..=signal.len() - frame_len)
            .step_by(hop)
            .max_by(|a, b| {
                energy(&signal[*a..*a + frame_len]).total_cmp(&energy(&signal[*b..*b + frame_len]))
            })?;
        let frame = &signal[start..start + frame_len];

        // One lag past max_tau so the last candidate has a right neighbour.
        let correlations: Vec<f64> = (0..=max_tau + 1)
            .map(|tau| {
                let a = &frame[..frame_len - tau];
                let b = &frame[tau..];
                let denominator = (energy(a) * energy(b)).sqrt();
                if denominator <= f64::EPSILON {
                    0.0
                } else {
                    a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>() / denominator
                }
            })
            .collect();

        let strongest = correlations[min_tau..=max_tau]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        if strongest <= 0.0 {
            return None;
        }
        // First local peak within 90% of the strongest.
        let tau = (min_tau..=max_tau).find(|&tau| {
            let c = correlations[tau];
            c >= 0.9 * strongest && c >= correlations[tau - 1] && c >= correlations[tau + 1]
        })?;

        // Whole-sample lags are too coarse for the top octaves.
        let frequency = sample_rate as f64 / parabolic_interpolation(&correlations, tau);
        if !(self.params.min_frequency..=self.params.max_frequency).contains(&frequency) {
            return None;
        }
        Some((frequency, correlations[tau]))
    }
}

impl PitchDetector for YinDetector {
    fn detect(&self, mono: &[f32], sample_rate: u32) -> PitchEstimate {
        let Some(signal) = self.preprocess(mono, sample_rate) else {
            return PitchEstimate::none();
        };

        if let Some((frequency, confidence)) = self.model_estimate(&signal, sample_rate) {
            if confidence > self.params.confidence_threshold {
                return PitchEstimate::found(frequency, confidence, PitchMethod::Model);
            }
        }

        match self.fallback_estimate(&signal, sample_rate) {
            Some((frequency, correlation)) if correlation >= self.params.fallback_threshold => {
                PitchEstimate::found(frequency, correlation, PitchMethod::Fallback)
            }
            _ => PitchEstimate::none(),
        }
    }
}

fn energy(frame: &[f64]) -> f64 {
    frame.iter().map(|x| x * x).sum()
}

fn parabolic_interpolation(values: &[f64], tau: usize) -> f64 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f64;
    }
    let (s0, s1, s2) = (values[tau - 1], values[tau], values[tau + 1]);
    let adjustment = (s0 - s2) / (2.0 * (s0 - 2.0 * s1 + s2));
    if adjustment.is_finite() && adjustment.abs() < 1.0 {
        tau as f64 + adjustment
    } else {
        tau as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::audio_test_utils::sine;

    const SAMPLE_RATE: u32 = 8000;

    fn detector() -> YinDetector {
        YinDetector::new(PitchParams {
            window: Duration::from_secs(1),
            ..Default::default()
        })
    }

    #[test]
    fn test_detects_a440() {
        let signal = sine(440.0, 0.5, SAMPLE_RATE, 0.5);
        let estimate = detector().detect(&signal, SAMPLE_RATE);
        assert_eq!(PitchMethod::Model, estimate.method);
        assert_eq!(Some(69), estimate.midi);
        let frequency = estimate.frequency.unwrap();
        assert!((frequency - 440.0).abs() < 5.0, "got {}", frequency);
        assert!(estimate.confidence > 0.5);
    }

    #[test]
    fn test_detects_low_note() {
        // C3
        let signal = sine(130.81, 0.3, SAMPLE_RATE, 0.5);
        let estimate = detector().detect(&signal, SAMPLE_RATE);
        assert_eq!(Some(48), estimate.midi);
    }

    #[test]
    fn test_quiet_signal_is_normalised() {
        let signal = sine(261.63, 0.01, SAMPLE_RATE, 0.5);
        let estimate = detector().detect(&signal, SAMPLE_RATE);
        assert_eq!(Some(60), estimate.midi);
    }

    #[test]
    fn test_silence_and_short_signals() {
        assert_eq!(
            PitchEstimate::none(),
            detector().detect(&vec![0.0; 4000], SAMPLE_RATE)
        );
        let short = sine(440.0, 0.5, SAMPLE_RATE, 0.05);
        assert!(short.len() < MIN_SIGNAL_SAMPLES);
        assert_eq!(PitchEstimate::none(), detector().detect(&short, SAMPLE_RATE));
    }

    #[test]
    fn test_fallback_finds_sine() {
        let detector = detector();
        let signal = detector
            .preprocess(&sine(440.0, 0.5, SAMPLE_RATE, 0.5), SAMPLE_RATE)
            .unwrap();
        let (frequency, correlation) = detector.fallback_estimate(&signal, SAMPLE_RATE).unwrap();
        assert_eq!(Some(69), midi::frequency_to_note(frequency));
        assert!(correlation > 0.9);
    }

    fn piano_detector() -> YinDetector {
        YinDetector::new(PitchParams {
            window: Duration::from_secs(1),
            max_frames: 6,
            ..Default::default()
        })
    }

    #[test]
    fn test_detects_keyboard_extremes() {
        let detector = piano_detector();
        for sample_rate in [44100, 48000, 96000] {
            for note in [midi::PIANO_MIN, midi::PIANO_MAX] {
                let frequency = midi::note_to_frequency(note) as f32;
                let signal = sine(frequency, 0.5, sample_rate, 0.5);
                let estimate = detector.detect(&signal, sample_rate);
                assert_eq!(
                    Some(note),
                    estimate.midi,
                    "note {} at {} Hz: {:?}",
                    note,
                    sample_rate,
                    estimate
                );
                let detected = estimate.frequency.unwrap();
                assert!(
                    (detected / frequency as f64 - 1.0).abs() < 0.01,
                    "note {} at {} Hz: got {}",
                    note,
                    sample_rate,
                    detected
                );
            }
        }
    }

    #[test]
    fn test_fallback_interpolates_high_notes() {
        let detector = piano_detector();
        let c8 = midi::note_to_frequency(midi::PIANO_MAX);
        for sample_rate in [44100, 48000] {
            let signal = detector
                .preprocess(&sine(c8 as f32, 0.5, sample_rate, 0.5), sample_rate)
                .unwrap();
            let (frequency, correlation) = detector.fallback_estimate(&signal, sample_rate).unwrap();
            assert_eq!(Some(midi::PIANO_MAX), midi::frequency_to_note(frequency));
            assert!((frequency - c8).abs() < 0.01 * c8, "got {}", frequency);
            assert!(correlation > 0.9);
        }
    }

    #[test]
    fn test_parabolic_interpolation() {
        let values = [1.0, 0.5, 0.1, 0.5, 1.0];
        assert_eq!(2.0, parabolic_interpolation(&values, 2));
        assert_eq!(0.0, parabolic_interpolation(&values, 0));
    }
}
