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
use std::path::PathBuf;

use crate::analysis::AnalysisError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::export::ExportError;
use crate::mapping::MappingError;
use crate::session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("no session is open")]
    NoSession,

    #[error("the session has no input folder")]
    NoInputFolder,

    #[error("the session has no output folder")]
    NoOutputFolder,

    #[error("the session's samples have not been scanned")]
    NotScanned,

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("unable to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("velocity layers must be between 1 and {max}, got {layers}")]
    InvalidLayers { layers: u8, max: u8 },

    #[error("invalid amplitude filter: minimum {min} exceeds maximum {max}")]
    InvalidFilter { min: f64, max: f64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
