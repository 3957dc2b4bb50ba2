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
//! Samples under consideration and the analysis record that survives session reloads.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::midi;
use crate::util::filename_display;

/// Version tag written into every cached analysis record.
pub const CACHE_VERSION: &str = "2.0";

/// How a sample's pitch was determined.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PitchMethod {
    /// The frame-based estimator.
    Model,
    /// Whole-signal autocorrelation.
    Fallback,
    /// No pitch could be found.
    None,
    /// Set by the user.
    Manual,
}

impl fmt::Display for PitchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PitchMethod::Model => "model",
            PitchMethod::Fallback => "fallback",
            PitchMethod::None => "none",
            PitchMethod::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Serializes decibel values so that silence (negative infinity) survives JSON.
mod db_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_finite() => serializer.serialize_some(v),
            Some(v) if v.is_nan() => serializer.serialize_none(),
            Some(v) if *v > 0.0 => serializer.serialize_some("inf"),
            Some(_) => serializer.serialize_some("-inf"),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Text(text)) => match text.as_str() {
                "-inf" | "-Infinity" => Ok(Some(f64::NEG_INFINITY)),
                "inf" | "Infinity" => Ok(Some(f64::INFINITY)),
                other => other.parse::<f64>().map(Some).map_err(D::Error::custom),
            },
        }
    }
}

/// The analysis fields of a sample as stored in the content cache.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AnalysisRecord {
    pub filename: String,
    pub file_path: String,
    pub file_size: u64,

    pub detected_midi: Option<u8>,
    pub detected_frequency: Option<f64>,
    pub pitch_confidence: Option<f64>,
    pub pitch_method: Option<PitchMethod>,

    pub velocity_amplitude: Option<f64>,
    #[serde(with = "db_serde")]
    pub velocity_amplitude_db: Option<f64>,
    pub velocity_duration_ms: Option<f64>,

    pub peak_amplitude: Option<f64>,
    #[serde(with = "db_serde")]
    pub peak_amplitude_db: Option<f64>,
    pub rms_amplitude: Option<f64>,
    #[serde(with = "db_serde")]
    pub rms_amplitude_db: Option<f64>,
    pub peak_position: Option<u64>,
    pub peak_position_seconds: Option<f64>,

    pub attack_peak: Option<f64>,
    pub attack_time: Option<f64>,
    pub attack_slope: Option<f64>,

    pub duration: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,

    pub analyzed_timestamp: Option<DateTime<Utc>>,
    pub cache_version: String,
}

impl AnalysisRecord {
    pub fn has_pitch(&self) -> bool {
        self.detected_midi.is_some()
    }

    pub fn has_amplitude(&self) -> bool {
        self.velocity_amplitude.is_some()
    }

    /// Whether the record is usable as a cache hit. The reason is returned on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.filename.is_empty() {
            return Err("missing filename".to_string());
        }
        if self.analyzed_timestamp.is_none() {
            return Err("missing analysis timestamp".to_string());
        }
        if !self.has_pitch() && !self.has_amplitude() {
            return Err("no pitch or amplitude data".to_string());
        }
        if let Some(note) = self.detected_midi.filter(|note| !midi::is_piano_note(*note)) {
            return Err(format!("note {} is outside the piano range", note));
        }
        Ok(())
    }

    /// Sets the pitch to a user-chosen note.
    pub fn set_manual_pitch(&mut self, note: u8) {
        self.detected_midi = Some(note);
        self.detected_frequency = Some(midi::note_to_frequency(note));
        self.pitch_confidence = Some(1.0);
        self.pitch_method = Some(PitchMethod::Manual);
    }
}

/// One audio file in the pool.
#[derive(Clone, Debug)]
pub struct Sample {
    path: PathBuf,
    hash: Option<String>,
    record: AnalysisRecord,
    analyzed: bool,
    mapped: bool,
    is_filtered: bool,
    disabled: bool,
}

impl Sample {
    pub fn new(path: PathBuf) -> Sample {
        Sample {
            path,
            hash: None,
            record: AnalysisRecord::default(),
            analyzed: false,
            mapped: false,
            is_filtered: false,
            disabled: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        filename_display(&self.path)
    }

    /// The content hash, once computed.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn set_hash(&mut self, hash: String) {
        self.hash = Some(hash);
    }

    pub fn record(&self) -> &AnalysisRecord {
        &self.record
    }

    pub fn detected_midi(&self) -> Option<u8> {
        self.record.detected_midi
    }

    pub fn velocity_amplitude(&self) -> Option<f64> {
        self.record.velocity_amplitude
    }

    pub fn analyzed(&self) -> bool {
        self.analyzed
    }

    pub fn mapped(&self) -> bool {
        self.mapped
    }

    pub fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// Installs analysis results. The sample counts as analyzed only with both a note
    /// and a velocity amplitude.
    pub fn apply_record(&mut self, record: AnalysisRecord) {
        self.analyzed = record.has_pitch() && record.has_amplitude();
        self.record = record;
    }

    /// Marks the sample as occupying (or not) a mapping slot. Only the mapping manager
    /// calls this.
    pub(crate) fn set_mapped(&mut self, mapped: bool) {
        self.mapped = mapped;
    }

    pub(crate) fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub(crate) fn set_manual_pitch(&mut self, note: u8) {
        self.record.set_manual_pitch(note);
        self.analyzed = self.record.has_amplitude();
    }

    /// Recomputes `is_filtered` against inclusive amplitude bounds.
    pub(crate) fn apply_amplitude_filter(&mut self, bounds: Option<(f64, f64)>) {
        self.is_filtered = match (bounds, self.velocity_amplitude()) {
            (Some((min, max)), Some(amplitude)) => amplitude < min || amplitude > max,
            _ => false,
        };
    }

    /// Whether auto-assignment may place this sample anywhere.
    pub fn is_eligible(&self) -> bool {
        self.analyzed
            && !self.is_filtered
            && !self.disabled
            && self.velocity_amplitude().is_some()
            && !self.mapped
    }

    /// Whether auto-assignment may place this sample on the given note.
    pub fn is_eligible_for(&self, note: u8) -> bool {
        self.is_eligible() && self.detected_midi() == Some(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzed_record(midi: u8, amplitude: f64) -> AnalysisRecord {
        AnalysisRecord {
            filename: "a.wav".to_string(),
            detected_midi: Some(midi),
            velocity_amplitude: Some(amplitude),
            analyzed_timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_record_requires_pitch_and_amplitude() {
        let mut sample = Sample::new(PathBuf::from("/s/a.wav"));
        sample.apply_record(AnalysisRecord {
            velocity_amplitude: Some(0.2),
            ..Default::default()
        });
        assert!(!sample.analyzed());

        sample.apply_record(analyzed_record(60, 0.2));
        assert!(sample.analyzed());
        assert!(sample.is_eligible_for(60));
        assert!(!sample.is_eligible_for(61));
    }

    #[test]
    fn test_validate_rejects_notes_off_the_keyboard() {
        assert!(analyzed_record(21, 0.2).validate().is_ok());
        assert!(analyzed_record(108, 0.2).validate().is_ok());
        assert!(analyzed_record(20, 0.2).validate().is_err());
        assert!(analyzed_record(200, 0.2).validate().is_err());
    }

    #[test]
    fn test_eligibility_flags() {
        let mut sample = Sample::new(PathBuf::from("/s/a.wav"));
        sample.apply_record(analyzed_record(60, 0.2));

        sample.set_mapped(true);
        assert!(!sample.is_eligible());
        sample.set_mapped(false);

        sample.set_disabled(true);
        assert!(!sample.is_eligible());
        sample.set_disabled(false);

        sample.apply_amplitude_filter(Some((0.3, 0.9)));
        assert!(sample.is_filtered());
        assert!(!sample.is_eligible());

        sample.apply_amplitude_filter(Some((0.2, 0.2)));
        assert!(!sample.is_filtered());
        sample.apply_amplitude_filter(None);
        assert!(sample.is_eligible());
    }

    #[test]
    fn test_record_validation() {
        assert!(analyzed_record(60, 0.1).validate().is_ok());
        assert!(AnalysisRecord::default().validate().is_err());

        let mut no_data = analyzed_record(60, 0.1);
        no_data.detected_midi = None;
        no_data.velocity_amplitude = None;
        assert!(no_data.validate().is_err());

        let mut pitch_only = analyzed_record(60, 0.1);
        pitch_only.velocity_amplitude = None;
        assert!(pitch_only.validate().is_ok());
    }

    #[test]
    fn test_negative_infinity_db_survives_json() {
        let mut record = analyzed_record(60, 0.0);
        record.velocity_amplitude_db = Some(f64::NEG_INFINITY);
        record.rms_amplitude_db = Some(-6.0);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!("-inf", value["velocity_amplitude_db"]);

        let parsed: AnalysisRecord = serde_json::from_value(value).unwrap();
        assert_eq!(Some(f64::NEG_INFINITY), parsed.velocity_amplitude_db);
        assert_eq!(Some(-6.0), parsed.rms_amplitude_db);
        assert_eq!(None, parsed.peak_amplitude_db);
    }

    #[test]
    fn test_record_ignores_unknown_fields() {
        let parsed: AnalysisRecord = serde_json::from_str(
            r#"{"filename": "x.wav", "detected_midi": 64, "pitch_method": "fallback", "future": [1, 2]}"#,
        )
        .unwrap();
        assert_eq!(Some(64), parsed.detected_midi);
        assert_eq!(Some(PitchMethod::Fallback), parsed.pitch_method);
    }

    #[test]
    fn test_manual_pitch() {
        let mut sample = Sample::new(PathBuf::from("/s/a.wav"));
        sample.apply_record(analyzed_record(60, 0.4));
        sample.set_manual_pitch(69);
        assert_eq!(Some(69), sample.detected_midi());
        assert_eq!(Some(PitchMethod::Manual), sample.record().pitch_method);
        assert!((sample.record().detected_frequency.unwrap() - 440.0).abs() < 1e-9);
        assert!(sample.analyzed());
    }
}
