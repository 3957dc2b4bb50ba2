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
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker identifying a session document.
pub const SESSION_FORMAT: &str = "sample-mapper-session";

/// Newest document schema this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

const DEFAULT_VELOCITY_LAYERS: u8 = 8;

/// Input and output folders.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Folders {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Inclusive velocity amplitude bounds; samples outside are excluded from auto-assignment.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct AmplitudeFilter {
    pub min: f64,
    pub max: f64,
}

impl AmplitudeFilter {
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub velocity_layers: u8,
    pub amplitude_filter: Option<AmplitudeFilter>,
    /// Content hashes of samples the user excluded from assignment.
    pub disabled: BTreeSet<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            velocity_layers: DEFAULT_VELOCITY_LAYERS,
            amplitude_filter: None,
            disabled: BTreeSet::new(),
        }
    }
}

/// Free-form description of the instrument being built.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct InstrumentMetadata {
    pub name: String,
    pub author: String,
    pub category: String,
    pub description: String,
    /// Incremented by every successful export.
    pub version: u32,
}

/// The persisted form of a session. Unknown fields are ignored and missing ones take
/// their defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionDocument {
    pub format: String,
    pub schema_version: u32,
    pub session_name: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub folders: Folders,
    /// Content hash to cached analysis record.
    pub samples_cache: BTreeMap<String, Value>,
    /// `"<midi>,<velocity>"` to content hash.
    pub mapping: BTreeMap<String, String>,
    pub settings: SessionSettings,
    pub metadata: InstrumentMetadata,
}

impl Default for SessionDocument {
    fn default() -> Self {
        let now = Utc::now();
        SessionDocument {
            format: SESSION_FORMAT.to_string(),
            schema_version: SCHEMA_VERSION,
            session_name: String::new(),
            created: now,
            last_modified: now,
            folders: Folders::default(),
            samples_cache: BTreeMap::new(),
            mapping: BTreeMap::new(),
            settings: SessionSettings::default(),
            metadata: InstrumentMetadata::default(),
        }
    }
}

impl SessionDocument {
    pub fn new(name: &str) -> SessionDocument {
        SessionDocument {
            session_name: name.to_string(),
            metadata: InstrumentMetadata {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Checks the format marker and schema version.
    pub fn check_format(&self) -> Result<(), String> {
        if self.format != SESSION_FORMAT {
            return Err(format!("unexpected format marker {:?}", self.format));
        }
        if self.schema_version > SCHEMA_VERSION {
            return Err(format!(
                "schema version {} is newer than {}",
                self.schema_version, SCHEMA_VERSION
            ));
        }
        Ok(())
    }
}
