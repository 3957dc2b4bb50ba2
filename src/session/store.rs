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
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::document::SessionDocument;
use super::error::SessionError;

const FILE_PREFIX: &str = "session-";
const FILE_SUFFIX: &str = ".json";
const INVALID_NAME_CHARACTERS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Stores sessions as `session-<name>.json` files in one directory. Each save keeps the
/// previous file as `.json.backup`.
#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: &Path) -> SessionStore {
        SessionStore {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the document path for a session name, rejecting names that could escape
    /// the directory or are invalid on common filesystems.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, SessionError> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed != name
            || name == "."
            || name == ".."
            || name.contains(&INVALID_NAME_CHARACTERS[..])
            || name.chars().any(char::is_control)
        {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}{}{}", FILE_PREFIX, name, FILE_SUFFIX)))
    }

    fn backup_path(path: &Path) -> PathBuf {
        path.with_extension("json.backup")
    }

    fn temp_path(path: &Path) -> PathBuf {
        path.with_extension("json.tmp")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    /// Names of all stored sessions, sorted.
    pub fn list(&self) -> Result<Vec<String>, SessionError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io(&self.dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::io(&self.dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            {
                if !name.is_empty() && entry.path().is_file() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Creates and persists an empty session.
    pub fn create(&self, name: &str) -> Result<SessionDocument, SessionError> {
        let path = self.path_for(name)?;
        if path.exists() {
            return Err(SessionError::AlreadyExists(name.to_string()));
        }
        let mut document = SessionDocument::new(name);
        self.save(&mut document)?;
        info!(session = name, path = ?path, "Created session");
        Ok(document)
    }

    /// Loads a session, returning None if it does not exist. The last-modified time is
    /// updated and written back immediately. A document that cannot be parsed is replaced
    /// by its backup when one is readable.
    pub fn load(&self, name: &str) -> Result<Option<SessionDocument>, SessionError> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Ok(None);
        }

        let (mut document, recovered) = match Self::read(&path) {
            Ok(document) => (document, false),
            Err(e @ SessionError::Parse { .. }) => {
                let backup = Self::backup_path(&path);
                match Self::read(&backup) {
                    Ok(document) => {
                        warn!(path = ?path, err = %e, "Session unreadable, using backup");
                        (document, true)
                    }
                    Err(_) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };
        document
            .check_format()
            .map_err(|reason| SessionError::Unsupported {
                path: path.clone(),
                reason,
            })?;
        if document.session_name != name {
            debug!(
                stored = %document.session_name,
                name, "Session name differs from file name"
            );
            document.session_name = name.to_string();
        }

        // The unreadable file must not replace the good backup.
        self.write(&mut document, !recovered)?;
        info!(session = name, "Loaded session");
        Ok(Some(document))
    }

    fn read(path: &Path) -> Result<SessionDocument, SessionError> {
        let contents = fs::read_to_string(path).map_err(|e| SessionError::io(path, e))?;
        serde_json::from_str(&contents).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the document. The new contents go to a temporary file which then replaces
    /// the document; the previous document is kept as a backup and put back if the
    /// replacement fails.
    pub fn save(&self, document: &mut SessionDocument) -> Result<(), SessionError> {
        self.write(document, true)
    }

    fn write(
        &self,
        document: &mut SessionDocument,
        keep_backup: bool,
    ) -> Result<(), SessionError> {
        let path = self.path_for(&document.session_name)?;
        fs::create_dir_all(&self.dir).map_err(|e| SessionError::io(&self.dir, e))?;

        document.last_modified = Utc::now();
        let contents = serde_json::to_string_pretty(document)?;

        let temp = Self::temp_path(&path);
        if let Err(e) = fs::write(&temp, contents) {
            let _ = fs::remove_file(&temp);
            return Err(SessionError::io(&temp, e));
        }

        let backup = Self::backup_path(&path);
        if keep_backup && path.is_file() {
            if let Err(e) = fs::copy(&path, &backup) {
                let _ = fs::remove_file(&temp);
                return Err(SessionError::io(&backup, e));
            }
        }

        if let Err(e) = fs::rename(&temp, &path) {
            error!(path = ?path, err = %e, "Unable to replace session file");
            let _ = fs::remove_file(&temp);
            if backup.is_file() {
                match fs::copy(&backup, &path) {
                    Ok(_) => info!(path = ?path, "Restored session from backup"),
                    Err(restore) => error!(path = ?path, err = %restore, "Backup restore failed"),
                }
            }
            return Err(SessionError::io(&path, e));
        }

        debug!(session = %document.session_name, path = ?path, "Saved session");
        Ok(())
    }

    /// Deletes a session and its backup. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool, SessionError> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| SessionError::io(&path, e))?;
        for extra in [Self::backup_path(&path), Self::temp_path(&path)] {
            if extra.is_file() {
                fs::remove_file(&extra).map_err(|e| SessionError::io(&extra, e))?;
            }
        }
        info!(session = name, "Deleted session");
        Ok(true)
    }
}
