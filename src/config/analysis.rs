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

use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::analysis::{AmplitudeParams, PitchParams};
use crate::midi;

const DEFAULT_VELOCITY_WINDOW: Duration = Duration::from_millis(500);
const MIN_VELOCITY_WINDOW: Duration = Duration::from_millis(100);
const MAX_VELOCITY_WINDOW: Duration = Duration::from_millis(2000);
const DEFAULT_PITCH_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_PEAK_WINDOW: Duration = Duration::from_millis(10);
const DEFAULT_ATTACK_WINDOW: Duration = Duration::from_millis(100);
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
const DEFAULT_FALLBACK_THRESHOLD: f64 = 0.3;
const DEFAULT_MAX_PITCH_FRAMES: usize = 48;
const DEFAULT_PEAK_PERCENTILE: f64 = 99.5;

/// The `analysis` block of the settings file.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Analysis {
    /// Leading window measured for the velocity amplitude (default: 500ms, clamped to 100ms-2s).
    velocity_window: Option<String>,

    /// How much of the start of each file is fed to pitch detection (default: 5s).
    pitch_window: Option<String>,

    /// Sliding window for the percentile peak (default: 10ms).
    peak_window: Option<String>,

    /// Window inspected for the attack envelope (default: 100ms).
    attack_window: Option<String>,

    /// Lowest detectable fundamental in Hz (default: half a semitone below A0, about 26.7).
    min_frequency: Option<f64>,

    /// Highest detectable fundamental in Hz (default: half a semitone above C8, about 4308.7).
    max_frequency: Option<f64>,

    /// Confidence the model estimator must exceed (default: 0.5).
    confidence_threshold: Option<f64>,

    /// Correlation the autocorrelation fallback must reach (default: 0.3).
    fallback_threshold: Option<f64>,

    /// Maximum number of frames evaluated per file (default: 48).
    max_pitch_frames: Option<usize>,

    /// Percentile used for the peak measurement (default: 99.5, clamped to 95-100).
    peak_percentile: Option<f64>,

    /// Treat a missing pitch as a hard analysis failure (default: false).
    require_pitch: Option<bool>,
}

/// The analysis block with all defaults applied, for display.
#[derive(Serialize, Debug)]
pub(super) struct EffectiveAnalysis {
    velocity_window: String,
    pitch_window: String,
    peak_window: String,
    attack_window: String,
    min_frequency: f64,
    max_frequency: f64,
    confidence_threshold: f64,
    fallback_threshold: f64,
    max_pitch_frames: usize,
    peak_percentile: f64,
    require_pitch: bool,
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let duration: Duration = match value {
        Some(value) => DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::InvalidDuration {
                field,
                reason: e.to_string(),
            })?
            .into(),
        None => default,
    };
    if duration.is_zero() {
        return Err(ConfigError::InvalidDuration {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

fn format_duration(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

impl Analysis {
    /// Returns the velocity window, clamped to the supported range.
    pub fn velocity_window(&self) -> Result<Duration, ConfigError> {
        let window = parse_duration(
            "analysis.velocity_window",
            &self.velocity_window,
            DEFAULT_VELOCITY_WINDOW,
        )?;
        Ok(window.clamp(MIN_VELOCITY_WINDOW, MAX_VELOCITY_WINDOW))
    }

    pub fn pitch_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "analysis.pitch_window",
            &self.pitch_window,
            DEFAULT_PITCH_WINDOW,
        )
    }

    pub fn peak_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "analysis.peak_window",
            &self.peak_window,
            DEFAULT_PEAK_WINDOW,
        )
    }

    pub fn attack_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "analysis.attack_window",
            &self.attack_window,
            DEFAULT_ATTACK_WINDOW,
        )
    }

    pub fn min_frequency(&self) -> f64 {
        self.min_frequency
            .unwrap_or_else(midi::lowest_piano_frequency)
    }

    pub fn max_frequency(&self) -> f64 {
        self.max_frequency
            .unwrap_or_else(midi::highest_piano_frequency)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn fallback_threshold(&self) -> f64 {
        self.fallback_threshold.unwrap_or(DEFAULT_FALLBACK_THRESHOLD)
    }

    /// Returns the frame budget for pitch detection; always at least 1.
    pub fn max_pitch_frames(&self) -> usize {
        self.max_pitch_frames
            .unwrap_or(DEFAULT_MAX_PITCH_FRAMES)
            .max(1)
    }

    pub fn peak_percentile(&self) -> f64 {
        self.peak_percentile
            .unwrap_or(DEFAULT_PEAK_PERCENTILE)
            .clamp(95.0, 100.0)
    }

    pub fn require_pitch(&self) -> bool {
        self.require_pitch.unwrap_or(false)
    }

    /// Builds the pitch detector parameters, validating the frequency range and thresholds.
    pub fn pitch_params(&self) -> Result<PitchParams, ConfigError> {
        let min_frequency = self.min_frequency();
        let max_frequency = self.max_frequency();
        if !(min_frequency > 0.0 && min_frequency < max_frequency) {
            return Err(ConfigError::InvalidValue {
                field: "analysis.min_frequency",
                reason: format!(
                    "must be positive and below max_frequency ({} >= {})",
                    min_frequency, max_frequency
                ),
            });
        }
        for (field, value) in [
            ("analysis.confidence_threshold", self.confidence_threshold()),
            ("analysis.fallback_threshold", self.fallback_threshold()),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{} is outside 0.0-1.0", value),
                });
            }
        }

        Ok(PitchParams {
            window: self.pitch_window()?,
            min_frequency,
            max_frequency,
            confidence_threshold: self.confidence_threshold(),
            fallback_threshold: self.fallback_threshold(),
            max_frames: self.max_pitch_frames(),
        })
    }

    pub fn amplitude_params(&self) -> Result<AmplitudeParams, ConfigError> {
        Ok(AmplitudeParams {
            velocity_window: self.velocity_window()?,
            peak_window: self.peak_window()?,
            peak_percentile: self.peak_percentile(),
            attack_window: self.attack_window()?,
        })
    }

    pub(super) fn effective(&self) -> Result<EffectiveAnalysis, ConfigError> {
        Ok(EffectiveAnalysis {
            velocity_window: format_duration(self.velocity_window()?),
            pitch_window: format_duration(self.pitch_window()?),
            peak_window: format_duration(self.peak_window()?),
            attack_window: format_duration(self.attack_window()?),
            min_frequency: self.min_frequency(),
            max_frequency: self.max_frequency(),
            confidence_threshold: self.confidence_threshold(),
            fallback_threshold: self.fallback_threshold(),
            max_pitch_frames: self.max_pitch_frames(),
            peak_percentile: self.peak_percentile(),
            require_pitch: self.require_pitch(),
        })
    }
}
