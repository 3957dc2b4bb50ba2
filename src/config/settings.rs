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
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::analysis::{Analysis, EffectiveAnalysis};
use super::error::ConfigError;

/// Settings file picked up from the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "sample-mapper.yaml";

const DEFAULT_SESSIONS_DIR: &str = "sessions";
const DEFAULT_EXTENSIONS: [&str; 7] = ["wav", "wave", "mp3", "flac", "aif", "aiff", "ogg"];
const DEFAULT_HASH_CHUNK_SIZE: usize = 8192;
const DEFAULT_VELOCITY_LAYERS: u8 = 8;
const DEFAULT_MAX_VELOCITY_LAYERS: u8 = 8;
const VELOCITY_LAYER_CEILING: u8 = 16;

/// A YAML representation of the mapper settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Settings {
    /// Directory holding session documents (default: "sessions").
    sessions_dir: Option<PathBuf>,

    /// Audio file extensions picked up by a folder scan, compared case-insensitively.
    extensions: Option<Vec<String>>,

    /// Whether folder scans descend into subdirectories (default: false).
    recursive_scan: Option<bool>,

    /// Bytes read per chunk while hashing file contents (default: 8192).
    hash_chunk_size: Option<usize>,

    /// Velocity layers for newly created sessions (default: 8).
    velocity_layers: Option<u8>,

    /// Upper bound on velocity layers a session may use (default: 8, at most 16).
    max_velocity_layers: Option<u8>,

    #[serde(default)]
    analysis: Analysis,
}

#[derive(Serialize, Debug)]
struct EffectiveSettings {
    sessions_dir: String,
    extensions: Vec<String>,
    recursive_scan: bool,
    hash_chunk_size: usize,
    velocity_layers: u8,
    max_velocity_layers: u8,
    analysis: EffectiveAnalysis,
}

impl Settings {
    /// Creates default settings that store sessions in the given directory.
    pub fn new(sessions_dir: &Path) -> Settings {
        Settings {
            sessions_dir: Some(sessions_dir.to_path_buf()),
            ..Default::default()
        }
    }

    /// Loads settings. An explicit path must exist; without one the default file in the
    /// working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let source = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE)
                .format(FileFormat::Yaml)
                .required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every accessor that can fail so bad values surface at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let layers = self.velocity_layers();
        if layers == 0 || layers > self.max_velocity_layers() {
            return Err(ConfigError::InvalidValue {
                field: "velocity_layers",
                reason: format!(
                    "{} is outside 1-{}",
                    layers,
                    self.max_velocity_layers()
                ),
            });
        }
        if self.hash_chunk_size.is_some_and(|size| size == 0) {
            return Err(ConfigError::InvalidValue {
                field: "hash_chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.analysis.pitch_params()?;
        self.analysis.amplitude_params()?;
        Ok(())
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSIONS_DIR))
    }

    /// Returns the scanned extensions, lowercased and without leading dots.
    pub fn extensions(&self) -> Vec<String> {
        match &self.extensions {
            Some(extensions) => extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            None => DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    pub fn recursive_scan(&self) -> bool {
        self.recursive_scan.unwrap_or(false)
    }

    pub fn hash_chunk_size(&self) -> usize {
        self.hash_chunk_size.unwrap_or(DEFAULT_HASH_CHUNK_SIZE).max(1)
    }

    pub fn velocity_layers(&self) -> u8 {
        self.velocity_layers.unwrap_or(DEFAULT_VELOCITY_LAYERS)
    }

    pub fn max_velocity_layers(&self) -> u8 {
        self.max_velocity_layers
            .unwrap_or(DEFAULT_MAX_VELOCITY_LAYERS)
            .clamp(1, VELOCITY_LAYER_CEILING)
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    /// Renders the settings with every default filled in.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let effective = EffectiveSettings {
            sessions_dir: self.sessions_dir().display().to_string(),
            extensions: self.extensions(),
            recursive_scan: self.recursive_scan(),
            hash_chunk_size: self.hash_chunk_size(),
            velocity_layers: self.velocity_layers(),
            max_velocity_layers: self.max_velocity_layers(),
            analysis: self.analysis.effective()?,
        };
        Ok(serde_yml::to_string(&effective)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_settings_from_yaml() {
        let yaml = r#"
            sessions_dir: /tmp/sessions
            extensions: [".WAV", "flac"]
            recursive_scan: true
            velocity_layers: 4
            analysis:
              velocity_window: 250ms
              require_pitch: true
        "#;

        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(PathBuf::from("/tmp/sessions"), settings.sessions_dir());
        assert_eq!(vec!["wav".to_string(), "flac".to_string()], settings.extensions());
        assert!(settings.recursive_scan());
        assert_eq!(4, settings.velocity_layers());
        assert_eq!(
            Duration::from_millis(250),
            settings.analysis().velocity_window().unwrap()
        );
        assert!(settings.analysis().require_pitch());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert_eq!(PathBuf::from("sessions"), settings.sessions_dir());
        assert_eq!(7, settings.extensions().len());
        assert_eq!(8192, settings.hash_chunk_size());
        assert_eq!(8, settings.velocity_layers());
        assert_eq!(8, settings.max_velocity_layers());
    }

    #[test]
    fn test_velocity_layers_above_max_rejected() {
        let result = Settings::from_yaml("velocity_layers: 12");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "velocity_layers",
                ..
            })
        ));

        let settings = Settings::from_yaml(
            r#"
            velocity_layers: 12
            max_velocity_layers: 32
        "#,
        )
        .unwrap();
        assert_eq!(16, settings.max_velocity_layers());
        assert_eq!(12, settings.velocity_layers());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "hash_chunk_size: 1024\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(1024, settings.hash_chunk_size());

        assert!(Settings::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_to_yaml_includes_defaults() {
        let settings = Settings::new(Path::new("/data/sessions"));
        let yaml = settings.to_yaml().unwrap();
        assert!(yaml.contains("sessions_dir: /data/sessions"));
        assert!(yaml.contains("velocity_window: 500ms"));
        assert!(yaml.contains("max_pitch_frames: 48"));
    }
}
