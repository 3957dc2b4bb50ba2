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
use std::time::Duration;

/// Amplitudes at or below this are reported as negative infinity decibels.
pub const DB_FLOOR: f64 = 1e-10;

/// Attack windows shorter than this many samples are not evaluated.
const MIN_ATTACK_SAMPLES: usize = 10;
const NOISE_FLOOR_PERCENTILE: f64 = 10.0;
const SIGNAL_OVER_NOISE: f64 = 3.0;

/// Tunables for loudness measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct AmplitudeParams {
    /// Leading window for the velocity amplitude.
    pub velocity_window: Duration,
    pub peak_window: Duration,
    pub peak_percentile: f64,
    pub attack_window: Duration,
}

impl Default for AmplitudeParams {
    fn default() -> Self {
        AmplitudeParams {
            velocity_window: Duration::from_millis(500),
            peak_window: Duration::from_millis(10),
            peak_percentile: 99.5,
            attack_window: Duration::from_millis(100),
        }
    }
}

/// Loudness measurements for one signal.
#[derive(Clone, Debug, PartialEq)]
pub struct AmplitudeReport {
    pub velocity_amplitude: f64,
    pub velocity_amplitude_db: f64,
    /// The window actually measured, after clamping to the signal length.
    pub velocity_duration_ms: f64,
    pub rms_amplitude: f64,
    pub rms_amplitude_db: f64,
    pub peak_amplitude: f64,
    pub peak_amplitude_db: f64,
    pub peak_position: u64,
    pub peak_position_seconds: f64,
    pub attack: Attack,
}

/// Shape of the onset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attack {
    pub peak: f64,
    /// Seconds from signal start to the attack peak.
    pub time: f64,
    /// Amplitude per second over the attack.
    pub slope: f64,
}

/// Converts a linear amplitude to decibels.
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= DB_FLOOR {
        f64::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

/// Root mean square of the samples; zero for an empty slice.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Linearly interpolated percentile of already sorted values.
fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    sorted[low] + (sorted[high] - sorted[low]) * (rank - low as f64)
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, percentile)
}

/// Median index of the samples at or above the given value.
fn median_index_at_or_above(values: &[f64], threshold: f64) -> Option<usize> {
    let candidates: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v >= threshold)
        .map(|(i, _)| i)
        .collect();
    candidates.get(candidates.len() / 2).copied()
}

fn window_samples(window: Duration, sample_rate: u32) -> usize {
    (window.as_secs_f64() * sample_rate as f64).round() as usize
}

/// Measures velocity amplitude and the diagnostic peak, RMS and attack values.
#[derive(Clone, Debug, Default)]
pub struct AmplitudeAnalyzer {
    params: AmplitudeParams,
}

impl AmplitudeAnalyzer {
    pub fn new(params: AmplitudeParams) -> AmplitudeAnalyzer {
        AmplitudeAnalyzer { params }
    }

    pub fn params(&self) -> &AmplitudeParams {
        &self.params
    }

    /// Analyzes a mono signal. Returns None for an empty signal.
    pub fn analyze(&self, mono: &[f32], sample_rate: u32) -> Option<AmplitudeReport> {
        if mono.is_empty() || sample_rate == 0 {
            return None;
        }

        let (velocity_amplitude, velocity_samples) = self.velocity_amplitude(mono, sample_rate);
        let rms_amplitude = rms(mono);
        let abs: Vec<f64> = mono.iter().map(|s| (*s as f64).abs()).collect();
        let (peak_amplitude, peak_position) = self.percentile_peak(&abs, sample_rate);

        Some(AmplitudeReport {
            velocity_amplitude,
            velocity_amplitude_db: amplitude_to_db(velocity_amplitude),
            velocity_duration_ms: velocity_samples as f64 * 1000.0 / sample_rate as f64,
            rms_amplitude,
            rms_amplitude_db: amplitude_to_db(rms_amplitude),
            peak_amplitude,
            peak_amplitude_db: amplitude_to_db(peak_amplitude),
            peak_position: peak_position as u64,
            peak_position_seconds: peak_position as f64 / sample_rate as f64,
            attack: self.attack(&abs, sample_rate),
        })
    }

    /// RMS over the leading velocity window, clamped to the signal. Returns the value
    /// and the number of samples measured.
    pub fn velocity_amplitude(&self, mono: &[f32], sample_rate: u32) -> (f64, usize) {
        let samples = window_samples(self.params.velocity_window, sample_rate)
            .max(1)
            .min(mono.len());
        (rms(&mono[..samples]), samples)
    }

    /// Highest per-window percentile over sliding windows with 75% overlap, and the
    /// median position of the loudest samples.
    fn percentile_peak(&self, abs: &[f64], sample_rate: u32) -> (f64, usize) {
        let window = window_samples(self.params.peak_window, sample_rate).clamp(1, abs.len());
        let hop = (window / 4).max(1);
        let percentile_value = self.params.peak_percentile;

        let peak = (0..=abs.len() - window)
            .step_by(hop)
            .map(|start| percentile(&abs[start..start + window], percentile_value))
            .fold(0.0, f64::max);

        let threshold = percentile(abs, percentile_value);
        let position = median_index_at_or_above(abs, threshold).unwrap_or(0);
        (peak, position)
    }

    fn attack(&self, abs: &[f64], sample_rate: u32) -> Attack {
        let samples = window_samples(self.params.attack_window, sample_rate).min(abs.len());
        if samples < MIN_ATTACK_SAMPLES {
            return Attack::default();
        }
        let section = &abs[..samples];

        let noise_floor = percentile(section, NOISE_FLOOR_PERCENTILE);
        let threshold = noise_floor * SIGNAL_OVER_NOISE;
        let Some(start) = section.iter().position(|v| *v > threshold) else {
            return Attack {
                peak: percentile(section, self.params.peak_percentile),
                ..Default::default()
            };
        };

        let rest = &section[start..];
        let peak_value = percentile(rest, self.params.peak_percentile);
        let peak_index = start + median_index_at_or_above(rest, peak_value).unwrap_or(0);

        let time = (peak_index - start) as f64 / sample_rate as f64;
        let peak = section[peak_index];
        let slope = if time > 0.0 {
            (peak - section[start]) / time
        } else {
            0.0
        };
        Attack { peak, time, slope }
    }
}
