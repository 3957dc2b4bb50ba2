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
//! Writes the mapped samples and their description to an output folder.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::coverage;
use crate::mapping::{MappingKey, MappingManager};
use crate::midi;
use crate::sample::Sample;
use crate::session::InstrumentMetadata;
use crate::util::{filename_display, lowercase_extension};

pub const COVERAGE_REPORT_FILE: &str = "coverage-report.txt";
pub const INSTRUMENT_DEFINITION_FILE: &str = "instrument-definition.json";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("nothing is mapped")]
    NothingToExport,

    #[error("unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to encode the instrument definition: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of an export run.
#[derive(Debug, Default)]
pub struct ExportSummary {
    /// Slots whose sample was written.
    pub exported: usize,
    /// Source file name and reason for every slot that was skipped.
    pub failed: Vec<(String, String)>,
    /// Audio files written, in slot order.
    pub files: Vec<PathBuf>,
}

#[derive(Serialize)]
struct SlotDefinition<'a> {
    note: u8,
    note_name: String,
    velocity_layer: u8,
    file: String,
    source: &'a str,
    velocity_amplitude: Option<f64>,
}

#[derive(Serialize)]
struct InstrumentDefinition<'a> {
    #[serde(flatten)]
    metadata: &'a InstrumentMetadata,
    velocity_layers: u8,
    exported: DateTime<Utc>,
    samples: Vec<SlotDefinition<'a>>,
}

/// Copies mapped samples to deterministic file names.
pub struct Exporter {
    output_dir: PathBuf,
}

impl Exporter {
    pub fn new(output_dir: &Path) -> Exporter {
        Exporter {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Reasons a slot cannot be exported, or the target file name if it can.
    fn target_name(
        key: MappingKey,
        sample: &Sample,
        velocity_layers: u8,
    ) -> Result<String, String> {
        if !midi::is_piano_note(key.note) {
            return Err(format!("note {} is outside the piano range", key.note));
        }
        if key.layer >= velocity_layers {
            return Err(format!(
                "velocity layer {} is not below {}",
                key.layer, velocity_layers
            ));
        }
        if !sample.analyzed() {
            return Err("sample has not been analyzed".to_string());
        }
        if !sample.path().is_file() {
            return Err("source file does not exist".to_string());
        }
        let sample_rate = sample
            .record()
            .sample_rate
            .ok_or_else(|| "sample rate is unknown".to_string())?;
        let extension =
            lowercase_extension(sample.path()).ok_or_else(|| "no file extension".to_string())?;
        Ok(midi::export_filename(
            key.note,
            key.layer,
            sample_rate,
            &extension,
        ))
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ExportError> {
        let path = self.output_dir.join(name);
        fs::write(&path, contents).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Exports every occupied slot, then writes the coverage report and the instrument
    /// definition. Slots that fail validation or copying are listed in the summary.
    pub fn export(
        &self,
        mapping: &MappingManager,
        metadata: &InstrumentMetadata,
    ) -> Result<ExportSummary, ExportError> {
        if mapping.is_empty() {
            return Err(ExportError::NothingToExport);
        }
        fs::create_dir_all(&self.output_dir).map_err(|source| ExportError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let velocity_layers = mapping.velocity_layers();
        let mut summary = ExportSummary::default();
        let mut slots = Vec::new();

        for (key, sample) in mapping.entries() {
            let source_name = filename_display(sample.path());
            let name = match Self::target_name(key, sample, velocity_layers) {
                Ok(name) => name,
                Err(reason) => {
                    warn!(file = source_name, key = %key, reason = %reason, "Skipping slot");
                    summary.failed.push((source_name.to_string(), reason));
                    continue;
                }
            };

            let target = self.output_dir.join(&name);
            if let Err(e) = fs::copy(sample.path(), &target) {
                warn!(file = source_name, target = ?target, err = %e, "Copy failed");
                summary.failed.push((source_name.to_string(), e.to_string()));
                continue;
            }

            slots.push(SlotDefinition {
                note: key.note,
                note_name: midi::note_name(key.note),
                velocity_layer: key.layer,
                file: name,
                source: source_name,
                velocity_amplitude: sample.velocity_amplitude(),
            });
            summary.files.push(target);
            summary.exported += 1;
        }

        let report = coverage::report(mapping.slots().keys(), velocity_layers);
        self.write(COVERAGE_REPORT_FILE, report.to_string().as_bytes())?;

        let definition = InstrumentDefinition {
            metadata,
            velocity_layers,
            exported: Utc::now(),
            samples: slots,
        };
        self.write(
            INSTRUMENT_DEFINITION_FILE,
            &serde_json::to_vec_pretty(&definition)?,
        )?;

        info!(
            dir = ?self.output_dir,
            exported = summary.exported,
            failed = summary.failed.len(),
            "Export finished"
        );
        Ok(summary)
    }
}
