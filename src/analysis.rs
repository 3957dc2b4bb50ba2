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
//! Turns audio files into analysis records: decode, detect pitch, measure loudness.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audio::{AudioLoader, SymphoniaLoader};
use crate::config::{self, ConfigError};
use crate::sample::{AnalysisRecord, Sample, CACHE_VERSION};
use crate::util::filename_display;

mod amplitude;
mod error;
mod pitch;
mod worker;

pub use amplitude::{amplitude_to_db, AmplitudeAnalyzer, AmplitudeParams, AmplitudeReport, Attack};
pub use error::AnalysisError;
pub use pitch::{PitchDetector, PitchEstimate, PitchParams, YinDetector};
pub use worker::{AnalysisEvent, AnalysisWorker, BatchOutcome, CancelToken};

/// Counts from a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub analyzed: usize,
    pub failed: Vec<(PathBuf, AnalysisError)>,
}

/// Loader, pitch detector and amplitude analyzer wired together.
pub struct AnalysisPipeline {
    loader: Box<dyn AudioLoader>,
    pitch: Box<dyn PitchDetector>,
    amplitude: AmplitudeAnalyzer,
    require_pitch: bool,
}

impl AnalysisPipeline {
    pub fn new(
        loader: Box<dyn AudioLoader>,
        pitch: Box<dyn PitchDetector>,
        amplitude: AmplitudeAnalyzer,
    ) -> AnalysisPipeline {
        AnalysisPipeline {
            loader,
            pitch,
            amplitude,
            require_pitch: false,
        }
    }

    /// Builds the symphonia/YIN pipeline from the analysis settings.
    pub fn from_settings(settings: &config::Analysis) -> Result<AnalysisPipeline, ConfigError> {
        Ok(AnalysisPipeline::new(
            Box::new(SymphoniaLoader::new()),
            Box::new(YinDetector::new(settings.pitch_params()?)),
            AmplitudeAnalyzer::new(settings.amplitude_params()?),
        )
        .with_require_pitch(settings.require_pitch()))
    }

    /// When set, a file without a detectable pitch is a hard failure rather than a
    /// partial record.
    pub fn with_require_pitch(mut self, require_pitch: bool) -> AnalysisPipeline {
        self.require_pitch = require_pitch;
        self
    }

    /// Analyzes one file. A missing pitch or amplitude still yields a record unless
    /// pitch is required.
    pub fn analyze(&self, path: &Path) -> Result<AnalysisRecord, AnalysisError> {
        let audio = self.loader.load(path)?;
        let mono = audio.mono();
        let sample_rate = audio.sample_rate();

        let estimate = self.pitch.detect(&mono, sample_rate);
        if estimate.midi.is_none() && self.require_pitch {
            return Err(AnalysisError::Detection {
                path: path.to_path_buf(),
                what: "pitch",
            });
        }

        let mut record = AnalysisRecord {
            filename: filename_display(path).to_string(),
            file_path: path.display().to_string(),
            file_size: fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            detected_midi: estimate.midi,
            detected_frequency: estimate.frequency,
            pitch_confidence: Some(estimate.confidence),
            pitch_method: Some(estimate.method),
            duration: Some(audio.duration().as_secs_f64()),
            sample_rate: Some(sample_rate),
            channels: Some(audio.channels()),
            analyzed_timestamp: Some(Utc::now()),
            cache_version: CACHE_VERSION.to_string(),
            ..Default::default()
        };

        if let Some(report) = self.amplitude.analyze(&mono, sample_rate) {
            record.velocity_amplitude = Some(report.velocity_amplitude);
            record.velocity_amplitude_db = Some(report.velocity_amplitude_db);
            record.velocity_duration_ms = Some(report.velocity_duration_ms);
            record.rms_amplitude = Some(report.rms_amplitude);
            record.rms_amplitude_db = Some(report.rms_amplitude_db);
            record.peak_amplitude = Some(report.peak_amplitude);
            record.peak_amplitude_db = Some(report.peak_amplitude_db);
            record.peak_position = Some(report.peak_position);
            record.peak_position_seconds = Some(report.peak_position_seconds);
            record.attack_peak = Some(report.attack.peak);
            record.attack_time = Some(report.attack.time);
            record.attack_slope = Some(report.attack.slope);
        }

        debug!(
            path = ?path,
            midi = ?record.detected_midi,
            method = %estimate.method,
            velocity_amplitude = ?record.velocity_amplitude,
            "Analyzed file"
        );
        Ok(record)
    }

    /// Analyzes a sample in place. The sample receives whatever was measured; an error
    /// is returned if it did not end up fully analyzed.
    pub fn analyze_sample(&self, sample: &mut Sample) -> Result<(), AnalysisError> {
        let record = self.analyze(sample.path())?;
        sample.apply_record(record);
        if sample.analyzed() {
            return Ok(());
        }
        Err(AnalysisError::Detection {
            path: sample.path().to_path_buf(),
            what: if sample.detected_midi().is_none() {
                "pitch"
            } else {
                "amplitude"
            },
        })
    }

    /// Analyzes each sample in order, reporting `(current, total)` after each file.
    /// Per-file failures are collected, never fatal.
    pub fn analyze_batch<F>(&self, samples: &mut [Sample], mut progress: F) -> BatchReport
    where
        F: FnMut(usize, usize),
    {
        let total = samples.len();
        let mut report = BatchReport::default();
        for (i, sample) in samples.iter_mut().enumerate() {
            match self.analyze_sample(sample) {
                Ok(()) => report.analyzed += 1,
                Err(e) => {
                    warn!(path = ?sample.path(), err = %e, "Analysis failed");
                    report.failed.push((sample.path().to_path_buf(), e));
                }
            }
            progress(i + 1, total);
        }
        info!(
            analyzed = report.analyzed,
            failed = report.failed.len(),
            "Batch analysis finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::audio::{DecodedAudio, LoadError};
    use crate::sample::PitchMethod;
    use crate::testutil::{write_sine_wav, FixedPitch};

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
    }

    impl AudioLoader for CountingLoader {
        fn load(&self, path: &Path) -> Result<DecodedAudio, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("broken") {
                return Err(LoadError::Empty(path.to_path_buf()));
            }
            Ok(DecodedAudio::from_mono(
                crate::testutil::audio_test_utils::sine(220.0, 0.5, 8000, 0.5),
                8000,
            ))
        }
    }

    fn yin_pipeline() -> AnalysisPipeline {
        AnalysisPipeline::new(
            Box::new(SymphoniaLoader::new()),
            Box::new(YinDetector::new(PitchParams::default())),
            AmplitudeAnalyzer::default(),
        )
    }

    #[test]
    fn test_analyze_sine_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a4.wav");
        write_sine_wav(path.clone(), 440.0, 0.5, 8000, 0.75).unwrap();

        let record = yin_pipeline().analyze(&path).unwrap();
        assert_eq!("a4.wav", record.filename);
        assert_eq!(Some(69), record.detected_midi);
        assert_eq!(Some(PitchMethod::Model), record.pitch_method);
        assert_eq!(Some(8000), record.sample_rate);
        assert_eq!(Some(1), record.channels);
        assert!(record.file_size > 0);
        let velocity = record.velocity_amplitude.unwrap();
        assert!((velocity - 0.5 / 2f64.sqrt()).abs() < 0.01);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_missing_pitch_is_partial() {
        let loads = Arc::new(AtomicUsize::new(0));
        let pipeline = AnalysisPipeline::new(
            Box::new(CountingLoader {
                loads: loads.clone(),
            }),
            Box::new(FixedPitch(None)),
            AmplitudeAnalyzer::default(),
        );

        let record = pipeline.analyze(Path::new("/virtual/a.wav")).unwrap();
        assert_eq!(None, record.detected_midi);
        assert!(record.velocity_amplitude.is_some());

        let mut sample = Sample::new(PathBuf::from("/virtual/a.wav"));
        assert!(matches!(
            pipeline.analyze_sample(&mut sample),
            Err(AnalysisError::Detection { what: "pitch", .. })
        ));
        assert!(!sample.analyzed());
        assert!(sample.velocity_amplitude().is_some());

        let strict = pipeline.with_require_pitch(true);
        assert!(matches!(
            strict.analyze(Path::new("/virtual/a.wav")),
            Err(AnalysisError::Detection { .. })
        ));
    }

    #[test]
    fn test_batch_tolerates_failures() {
        let loads = Arc::new(AtomicUsize::new(0));
        let pipeline = AnalysisPipeline::new(
            Box::new(CountingLoader {
                loads: loads.clone(),
            }),
            Box::new(FixedPitch(Some(57))),
            AmplitudeAnalyzer::default(),
        );

        let mut samples = vec![
            Sample::new(PathBuf::from("/virtual/a.wav")),
            Sample::new(PathBuf::from("/virtual/broken.wav")),
            Sample::new(PathBuf::from("/virtual/c.wav")),
        ];
        let mut progress = Vec::new();
        let report = pipeline.analyze_batch(&mut samples, |current, total| {
            progress.push((current, total))
        });

        assert_eq!(2, report.analyzed);
        assert_eq!(1, report.failed.len());
        assert_eq!(PathBuf::from("/virtual/broken.wav"), report.failed[0].0);
        assert!(matches!(report.failed[0].1, AnalysisError::Load(_)));
        assert_eq!(vec![(1, 3), (2, 3), (3, 3)], progress);
        assert_eq!(3, loads.load(Ordering::SeqCst));
        assert!(samples[0].analyzed());
        assert!(!samples[1].analyzed());
        assert_eq!(Some(57), samples[2].detected_midi());
    }

    #[test]
    fn test_unreadable_file_is_load_failure() {
        let dir = tempdir().unwrap();
        let mut sample = Sample::new(dir.path().join("missing.wav"));
        assert!(matches!(
            yin_pipeline().analyze_sample(&mut sample),
            Err(AnalysisError::Load(LoadError::Io { .. }))
        ));
    }
}
