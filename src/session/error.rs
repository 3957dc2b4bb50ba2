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

/// Session persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session name {0:?}")]
    InvalidName(String),

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("session {0} does not exist")]
    NotFound(String),

    #[error("session I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse session {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unable to encode session: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{path} is not a supported session document: {reason}")]
    Unsupported { path: PathBuf, reason: String },
}

impl SessionError {
    pub(super) fn io(path: &std::path::Path, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
