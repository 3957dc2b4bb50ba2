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
//! The session-level facade: scanning, analysis, mapping edits and export, each saved
//! to the session store as one logical operation.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analysis::{AnalysisEvent, AnalysisPipeline, AnalysisWorker, CancelToken};
use crate::assign::{AssignSummary, AssignTarget, VelocityAutoAssigner};
use crate::cache::ContentCache;
use crate::config::Settings;
use crate::coverage::{self, CoverageSummary};
use crate::export::{ExportSummary, Exporter};
use crate::mapping::{ConflictPolicy, MappingKey, MappingManager, SamplePool};
use crate::sample::Sample;
use crate::session::{AmplitudeFilter, InstrumentMetadata, SessionDocument, SessionError, SessionStore};

mod error;

pub use error::WorkspaceError;

/// What a folder scan found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub discovered: usize,
    /// Restored from the session cache.
    pub cached: usize,
    /// Still waiting for analysis.
    pub pending: usize,
    /// Mapping entries resolved against the scanned samples.
    pub restored: usize,
}

/// Result of an analysis run.
#[derive(Debug, Default)]
pub struct AnalyzeSummary {
    pub analyzed: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub cancelled: bool,
}

struct ActiveSession {
    document: SessionDocument,
    cache: ContentCache,
    mapping: MappingManager,
    /// Set once the pool reflects the input folder. Until then the persisted mapping is
    /// left as loaded.
    scanned: bool,
}

impl ActiveSession {
    fn amplitude_bounds(&self) -> Option<(f64, f64)> {
        self.document
            .settings
            .amplitude_filter
            .map(|filter| filter.bounds())
    }
}

/// Owns the open session and everything that operates on it.
pub struct Workspace {
    settings: Settings,
    store: SessionStore,
    pipeline: Arc<AnalysisPipeline>,
    session: Option<ActiveSession>,
}

impl Workspace {
    /// Creates a workspace with the analysis pipeline described by the settings.
    pub fn new(settings: Settings) -> Result<Workspace, WorkspaceError> {
        let pipeline = AnalysisPipeline::from_settings(settings.analysis())?;
        Ok(Workspace::with_pipeline(settings, pipeline))
    }

    pub fn with_pipeline(settings: Settings, pipeline: AnalysisPipeline) -> Workspace {
        let store = SessionStore::new(&settings.sessions_dir());
        Workspace {
            settings,
            store,
            pipeline: Arc::new(pipeline),
            session: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn session_name(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|active| active.document.session_name.as_str())
    }

    pub fn document(&self) -> Option<&SessionDocument> {
        self.session.as_ref().map(|active| &active.document)
    }

    pub fn mapping(&self) -> Option<&MappingManager> {
        self.session.as_ref().map(|active| &active.mapping)
    }

    pub fn cache(&self) -> Option<&ContentCache> {
        self.session.as_ref().map(|active| &active.cache)
    }

    /// Samples of the open session in path order.
    pub fn samples(&self) -> Vec<&Sample> {
        match &self.session {
            Some(active) => active.mapping.pool().iter().collect(),
            None => Vec::new(),
        }
    }

    fn active(&self) -> Result<&ActiveSession, WorkspaceError> {
        self.session.as_ref().ok_or(WorkspaceError::NoSession)
    }

    fn active_mut(&mut self) -> Result<&mut ActiveSession, WorkspaceError> {
        self.session.as_mut().ok_or(WorkspaceError::NoSession)
    }

    /// Copies the cache and mapping into the document and writes it.
    fn persist(store: &SessionStore, active: &mut ActiveSession) -> Result<(), WorkspaceError> {
        active.document.samples_cache = active.cache.entries().clone();
        if active.scanned {
            active.document.mapping = active.mapping.to_hashes();
        }
        active.document.settings.velocity_layers = active.mapping.velocity_layers();
        store.save(&mut active.document)?;
        Ok(())
    }

    /// Saves the open session.
    fn save_active(&mut self) -> Result<(), WorkspaceError> {
        let active = self.session.as_mut().ok_or(WorkspaceError::NoSession)?;
        Self::persist(&self.store, active)
    }

    fn activate(&mut self, mut document: SessionDocument) {
        let max = self.settings.max_velocity_layers();
        let layers = document.settings.velocity_layers.clamp(1, max);
        if layers != document.settings.velocity_layers {
            warn!(
                session = %document.session_name,
                stored = document.settings.velocity_layers,
                layers,
                "Clamping velocity layers"
            );
            document.settings.velocity_layers = layers;
        }
        let cache = ContentCache::from_entries(
            document.samples_cache.clone(),
            self.settings.hash_chunk_size(),
        );
        self.session = Some(ActiveSession {
            document,
            cache,
            mapping: MappingManager::new(SamplePool::default(), layers),
            scanned: false,
        });
    }

    pub fn list_sessions(&self) -> Result<Vec<String>, WorkspaceError> {
        Ok(self.store.list()?)
    }

    /// Deletes a stored session. The open session is closed without saving if it is the
    /// one being deleted.
    pub fn delete_session(&mut self, name: &str) -> Result<bool, WorkspaceError> {
        if self.session_name() == Some(name) {
            self.session = None;
        }
        Ok(self.store.delete(name)?)
    }

    /// Creates a new session and makes it the open one.
    pub fn create_session(&mut self, name: &str) -> Result<(), WorkspaceError> {
        self.close_session()?;
        let mut document = self.store.create(name)?;
        document.settings.velocity_layers = self
            .settings
            .velocity_layers()
            .clamp(1, self.settings.max_velocity_layers());
        self.store.save(&mut document)?;
        self.activate(document);
        Ok(())
    }

    /// Opens a stored session. Its input folder is scanned again if it still exists.
    pub fn load_session(&mut self, name: &str) -> Result<(), WorkspaceError> {
        self.close_session()?;
        let document = self
            .store
            .load(name)?
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;
        let input = document.folders.input.clone();
        self.activate(document);

        match input {
            Some(input) if input.is_dir() => {
                self.scan_folder(&input)?;
            }
            Some(input) => warn!(session = name, input = ?input, "Input folder is missing"),
            None => debug!(session = name, "Session has no input folder yet"),
        }
        Ok(())
    }

    pub fn save_session(&mut self) -> Result<(), WorkspaceError> {
        self.save_active()
    }

    /// Saves and closes the open session, if any.
    pub fn close_session(&mut self) -> Result<(), WorkspaceError> {
        if let Some(mut active) = self.session.take() {
            Self::persist(&self.store, &mut active)?;
            info!(session = %active.document.session_name, "Closed session");
        }
        Ok(())
    }

    /// Audio files under the folder, sorted by path.
    fn discover(&self, folder: &Path) -> Result<Vec<PathBuf>, WorkspaceError> {
        let extensions: HashSet<String> = self.settings.extensions().into_iter().collect();
        let mut found = BTreeSet::new();
        collect_audio_files(
            folder,
            &extensions,
            self.settings.recursive_scan(),
            &mut found,
        )?;
        Ok(found.into_iter().collect())
    }

    /// Replaces the session's samples with the audio files in the folder. Known content
    /// is restored from the cache and the persisted mapping is resolved against it.
    pub fn scan_folder(&mut self, folder: &Path) -> Result<ScanSummary, WorkspaceError> {
        if !folder.is_dir() {
            return Err(WorkspaceError::NotADirectory(folder.to_path_buf()));
        }
        self.active()?;
        let files = self.discover(folder)?;
        let active = self.active_mut()?;

        let reconciliation = active
            .cache
            .reconcile(files.into_iter().map(Sample::new).collect());
        let mut summary = ScanSummary {
            cached: reconciliation.cached.len(),
            pending: reconciliation.to_analyze.len(),
            ..Default::default()
        };

        let mut samples = reconciliation.cached;
        samples.extend(reconciliation.to_analyze);
        summary.discovered = samples.len();
        for sample in samples.iter_mut() {
            let disabled = sample
                .hash()
                .is_some_and(|hash| active.document.settings.disabled.contains(hash));
            sample.set_disabled(disabled);
        }

        active.mapping.replace_pool(SamplePool::new(samples));
        active.mapping.set_amplitude_filter(active.amplitude_bounds());
        summary.restored = active
            .mapping
            .restore_from_hashes(&active.document.mapping);
        active.document.folders.input = Some(folder.to_path_buf());
        active.scanned = true;

        info!(
            folder = ?folder,
            discovered = summary.discovered,
            cached = summary.cached,
            pending = summary.pending,
            restored = summary.restored,
            "Scanned folder"
        );
        self.save_active()?;
        Ok(summary)
    }

    /// Scans the session's stored input folder again.
    pub fn rescan(&mut self) -> Result<ScanSummary, WorkspaceError> {
        let input = self
            .active()?
            .document
            .folders
            .input
            .clone()
            .ok_or(WorkspaceError::NoInputFolder)?;
        self.scan_folder(&input)
    }

    /// Analyzes every sample that is not yet analyzed on a background worker, passing
    /// its events to `progress`. Whatever finished before a cancellation is kept.
    pub fn analyze<F>(
        &mut self,
        mut progress: F,
        cancel: &CancelToken,
    ) -> Result<AnalyzeSummary, WorkspaceError>
    where
        F: FnMut(&AnalysisEvent),
    {
        let pipeline = self.pipeline.clone();
        let active = self.active_mut()?;
        let pending: Vec<Sample> = active
            .mapping
            .pool()
            .iter()
            .filter(|sample| !sample.analyzed())
            .cloned()
            .collect();
        if pending.is_empty() {
            debug!("Nothing to analyze");
            return Ok(AnalyzeSummary::default());
        }

        let worker = AnalysisWorker::spawn(pipeline, pending, active.cache.clone(), cancel.clone())?;
        for event in worker.events().iter() {
            progress(&event);
        }
        let outcome = worker.join()?;

        active.cache = outcome.cache;
        active.mapping.update_samples(outcome.samples);
        active.mapping.set_amplitude_filter(active.amplitude_bounds());

        let summary = AnalyzeSummary {
            analyzed: outcome.analyzed,
            failed: outcome
                .failures
                .into_iter()
                .map(|(path, e)| (path, e.to_string()))
                .collect(),
            cancelled: outcome.cancelled,
        };
        self.save_active()?;
        Ok(summary)
    }

    pub fn auto_assign(&mut self, target: AssignTarget) -> Result<AssignSummary, WorkspaceError> {
        let active = self.active_mut()?;
        if !active.scanned {
            return Err(WorkspaceError::NotScanned);
        }
        let summary = VelocityAutoAssigner::new(&mut active.mapping).run(target);
        self.save_active()?;
        Ok(summary)
    }

    /// Maps a sample to a slot. Returns the sample displaced under `ConflictPolicy::Replace`.
    pub fn add_mapping(
        &mut self,
        path: &Path,
        key: MappingKey,
        policy: ConflictPolicy,
    ) -> Result<Option<PathBuf>, WorkspaceError> {
        let displaced = self.active_mut()?.mapping.add(path, key, policy)?;
        self.save_active()?;
        Ok(displaced)
    }

    pub fn remove_mapping(&mut self, key: MappingKey) -> Result<PathBuf, WorkspaceError> {
        let removed = self.active_mut()?.mapping.remove(key)?;
        self.save_active()?;
        Ok(removed)
    }

    pub fn move_mapping(
        &mut self,
        from: MappingKey,
        to: MappingKey,
        policy: ConflictPolicy,
    ) -> Result<Option<PathBuf>, WorkspaceError> {
        let displaced = self.active_mut()?.mapping.move_mapping(from, to, policy)?;
        self.save_active()?;
        Ok(displaced)
    }

    /// Coverage of the current mapping. Before a scan the persisted mapping is used.
    pub fn coverage_report(&self) -> Result<CoverageSummary, WorkspaceError> {
        let active = self.active()?;
        let layers = active.mapping.velocity_layers();
        if active.scanned {
            return Ok(coverage::report(active.mapping.slots().keys(), layers));
        }
        let keys: Vec<MappingKey> = active
            .document
            .mapping
            .keys()
            .filter_map(|key| key.parse().ok())
            .collect();
        Ok(coverage::report(&keys, layers))
    }

    pub fn set_output_folder(&mut self, folder: &Path) -> Result<(), WorkspaceError> {
        self.active_mut()?.document.folders.output = Some(folder.to_path_buf());
        self.save_active()
    }

    /// Replaces the instrument metadata. The export version is kept.
    pub fn set_metadata(&mut self, metadata: InstrumentMetadata) -> Result<(), WorkspaceError> {
        let active = self.active_mut()?;
        let version = active.document.metadata.version;
        active.document.metadata = InstrumentMetadata {
            version,
            ..metadata
        };
        self.save_active()
    }

    pub fn set_amplitude_filter(
        &mut self,
        filter: Option<AmplitudeFilter>,
    ) -> Result<(), WorkspaceError> {
        if let Some(filter) = filter {
            if filter.min > filter.max || !filter.min.is_finite() || !filter.max.is_finite() {
                return Err(WorkspaceError::InvalidFilter {
                    min: filter.min,
                    max: filter.max,
                });
            }
        }
        let active = self.active_mut()?;
        active.document.settings.amplitude_filter = filter;
        active.mapping.set_amplitude_filter(active.amplitude_bounds());
        self.save_active()
    }

    pub fn set_disabled(&mut self, path: &Path, disabled: bool) -> Result<(), WorkspaceError> {
        let active = self.active_mut()?;
        active.mapping.set_disabled(path, disabled)?;
        let hash = active
            .mapping
            .pool()
            .get(path)
            .and_then(|sample| sample.hash())
            .map(str::to_string);
        match hash {
            Some(hash) if disabled => {
                active.document.settings.disabled.insert(hash);
            }
            Some(hash) => {
                active.document.settings.disabled.remove(&hash);
            }
            None => warn!(path = ?path, "Disabled flag for an unhashed sample is not persisted"),
        }
        self.save_active()
    }

    /// Changes the layer count. Slots in removed layers are emptied; their keys are
    /// returned.
    pub fn set_velocity_layers(&mut self, layers: u8) -> Result<Vec<MappingKey>, WorkspaceError> {
        let max = self.settings.max_velocity_layers();
        if layers == 0 || layers > max {
            return Err(WorkspaceError::InvalidLayers { layers, max });
        }
        let active = self.active_mut()?;
        let removed = active.mapping.set_velocity_layers(layers);
        if !active.scanned {
            active.document.mapping.retain(|key, _| {
                key.parse::<MappingKey>()
                    .is_ok_and(|key| key.layer < layers)
            });
        }
        active.document.settings.velocity_layers = layers;
        info!(layers, removed = removed.len(), "Changed velocity layers");
        self.save_active()?;
        Ok(removed)
    }

    /// Sets a sample's note by hand and records it in the cache so the override survives
    /// reloads. Returns the slot vacated because the note changed.
    pub fn override_pitch(
        &mut self,
        path: &Path,
        note: u8,
    ) -> Result<Option<MappingKey>, WorkspaceError> {
        let active = self.active_mut()?;
        let vacated = active.mapping.override_pitch(path, note)?;
        if let Some(sample) = active.mapping.pool().get(path) {
            match sample.hash() {
                Some(hash) => active.cache.put(hash, sample.record())?,
                None => warn!(path = ?path, "Pitch override for an unhashed sample is not cached"),
            }
        }
        self.save_active()?;
        Ok(vacated)
    }

    /// Exports the mapping to `output`, or to the session's output folder. A successful
    /// export with at least one file bumps the instrument version.
    pub fn export(&mut self, output: Option<&Path>) -> Result<ExportSummary, WorkspaceError> {
        let active = self.active_mut()?;
        if !active.scanned {
            return Err(WorkspaceError::NotScanned);
        }
        let dir = match output {
            Some(dir) => dir.to_path_buf(),
            None => active
                .document
                .folders
                .output
                .clone()
                .ok_or(WorkspaceError::NoOutputFolder)?,
        };

        let mut metadata = active.document.metadata.clone();
        metadata.version += 1;
        let summary = Exporter::new(&dir).export(&active.mapping, &metadata)?;
        if summary.exported > 0 {
            active.document.metadata = metadata;
        }
        active.document.folders.output = Some(dir);
        self.save_active()?;
        Ok(summary)
    }

    /// Drops cache entries whose content is no longer in the scanned folder.
    pub fn cleanup_cache(&mut self) -> Result<usize, WorkspaceError> {
        let active = self.active_mut()?;
        if !active.scanned {
            return Err(WorkspaceError::NotScanned);
        }
        let valid: HashSet<String> = active
            .mapping
            .pool()
            .iter()
            .filter_map(|sample| sample.hash().map(str::to_string))
            .collect();
        let removed = active.cache.cleanup(&valid);
        info!(removed, "Cleaned up cache");
        self.save_active()?;
        Ok(removed)
    }
}

/// Recurse into the given path and collect files whose lowercased extension is listed.
/// The set removes duplicates reported by case-insensitive filesystems.
fn collect_audio_files(
    dir: &Path,
    extensions: &HashSet<String>,
    recursive: bool,
    found: &mut BTreeSet<PathBuf>,
) -> Result<(), WorkspaceError> {
    let scan_error = |source| WorkspaceError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(scan_error)? {
        let path = entry.map_err(scan_error)?.path();
        if path.is_dir() {
            if recursive {
                collect_audio_files(&path, extensions, recursive, found)?;
            }
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext.to_ascii_lowercase()));
        if matches && path.is_file() {
            found.insert(path);
        }
    }
    Ok(())
}
