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
//! Content-addressed store of analysis records.
//!
//! Entries are keyed by the SHA-256 of a file's bytes and kept as raw JSON values so
//! that a malformed entry only costs a re-analysis of that one file.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::sample::{AnalysisRecord, Sample};
use crate::util::short_hash;

/// Default number of bytes read per hashing step.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unable to hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache entry {hash}: {reason}")]
    Invalid { hash: String, reason: String },

    #[error("unable to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Computes the hex SHA-256 of a file, reading it in chunks.
pub fn hash_file(path: &Path, chunk_size: usize) -> Result<String, CacheError> {
    let map_err = |source| CacheError::Hash {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(map_err)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        let read = file.read(&mut buffer).map_err(map_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Samples split by whether the cache already knows their content.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Restored from the cache.
    pub cached: Vec<Sample>,
    /// Need a fresh analysis.
    pub to_analyze: Vec<Sample>,
}

/// Size of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Size of the entries when serialized as JSON.
    pub size_bytes: usize,
}

/// In-memory cache of analysis records. Persistence belongs to the session store.
#[derive(Debug, Clone)]
pub struct ContentCache {
    entries: BTreeMap<String, Value>,
    chunk_size: usize,
}

impl Default for ContentCache {
    fn default() -> Self {
        ContentCache::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ContentCache {
    pub fn new(chunk_size: usize) -> ContentCache {
        ContentCache::from_entries(BTreeMap::new(), chunk_size)
    }

    /// Wraps entries loaded from a session document.
    pub fn from_entries(entries: BTreeMap<String, Value>, chunk_size: usize) -> ContentCache {
        ContentCache {
            entries,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    /// Hashes a file with this cache's chunk size.
    pub fn hash(&self, path: &Path) -> Result<String, CacheError> {
        hash_file(path, self.chunk_size)
    }

    /// Parses and validates an entry.
    pub fn lookup(&self, hash: &str) -> Result<Option<AnalysisRecord>, CacheError> {
        let Some(value) = self.entries.get(hash) else {
            return Ok(None);
        };
        let record: AnalysisRecord =
            serde_json::from_value(value.clone()).map_err(|e| CacheError::Invalid {
                hash: hash.to_string(),
                reason: e.to_string(),
            })?;
        record.validate().map_err(|reason| CacheError::Invalid {
            hash: hash.to_string(),
            reason,
        })?;
        Ok(Some(record))
    }

    /// Returns the record for a hash if present and valid. Invalid entries are logged
    /// and reported as a miss.
    pub fn get(&self, hash: &str) -> Option<AnalysisRecord> {
        match self.lookup(hash) {
            Ok(record) => record,
            Err(e) => {
                warn!(hash = %short_hash(hash), err = %e, "Ignoring invalid cache entry");
                None
            }
        }
    }

    pub fn put(&mut self, hash: &str, record: &AnalysisRecord) -> Result<(), CacheError> {
        let value = serde_json::to_value(record)?;
        self.entries.insert(hash.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, hash: &str) -> bool {
        self.entries.remove(hash).is_some()
    }

    /// Hashes every sample (in parallel) and splits them into cache hits and misses.
    /// Both lists keep the input order. Samples that cannot be hashed need analysis.
    /// Hits found under a new name have their entry updated to the current path.
    pub fn reconcile(&mut self, mut samples: Vec<Sample>) -> Reconciliation {
        let chunk_size = self.chunk_size;
        samples.par_iter_mut().for_each(|sample| {
            if sample.hash().is_some() {
                return;
            }
            match hash_file(sample.path(), chunk_size) {
                Ok(hash) => sample.set_hash(hash),
                Err(e) => warn!(err = %e, "Unable to hash sample"),
            }
        });

        let mut reconciliation = Reconciliation::default();
        for mut sample in samples {
            let hit = sample
                .hash()
                .and_then(|hash| self.get(hash).map(|record| (hash.to_string(), record)));
            match hit {
                Some((hash, mut record)) => {
                    debug!(path = ?sample.path(), "Cache hit");
                    let file_path = sample.path().display().to_string();
                    if record.file_path != file_path {
                        debug!(from = %record.file_path, to = %file_path, "Cached file moved");
                        record.filename = sample.filename().to_string();
                        record.file_path = file_path;
                        if let Err(e) = self.put(&hash, &record) {
                            warn!(err = %e, "Unable to refresh cache entry");
                        }
                    }
                    sample.apply_record(record);
                    reconciliation.cached.push(sample);
                }
                None => {
                    debug!(path = ?sample.path(), "Cache miss");
                    reconciliation.to_analyze.push(sample);
                }
            }
        }
        reconciliation
    }

    /// Removes entries whose content hash is not among the given hashes. Returns the
    /// number removed.
    pub fn cleanup(&mut self, valid_hashes: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|hash, _| valid_hashes.contains(hash));
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            size_bytes: serde_json::to_string(&self.entries)
                .map(|s| s.len())
                .unwrap_or(0),
        }
    }
}
