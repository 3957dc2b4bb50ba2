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
//! The note by velocity mapping and the sample pool it draws from.
//!
//! `MappingManager` is the only place slot occupancy and the samples' `mapped` flags
//! change, so the two always agree: a sample is mapped iff exactly one slot holds it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::midi;
use crate::sample::Sample;
use crate::util::short_hash;

mod key;
mod pool;

pub use key::MappingKey;
pub use pool::SamplePool;

/// What to do when the target slot already holds a different sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with `MappingError::SlotOccupied`.
    Reject,
    /// Unmap the occupant and take the slot.
    Replace,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MappingError {
    #[error("slot {key} is occupied by {}", .occupant.display())]
    SlotOccupied { key: MappingKey, occupant: PathBuf },

    #[error("unknown sample {}", .0.display())]
    UnknownSample(PathBuf),

    #[error("note {0} is outside the piano range")]
    NoteOutOfRange(u8),

    #[error("velocity layer {layer} is not below the layer count {layers}")]
    LayerOutOfRange { layer: u8, layers: u8 },

    #[error("slot {0} is empty")]
    EmptySlot(MappingKey),
}

/// Owns the sample pool and the slot table.
#[derive(Debug, Default)]
pub struct MappingManager {
    pool: SamplePool,
    slots: BTreeMap<MappingKey, PathBuf>,
    velocity_layers: u8,
}

impl MappingManager {
    pub fn new(pool: SamplePool, velocity_layers: u8) -> MappingManager {
        MappingManager {
            pool,
            slots: BTreeMap::new(),
            velocity_layers: velocity_layers.max(1),
        }
    }

    pub fn pool(&self) -> &SamplePool {
        &self.pool
    }

    pub fn velocity_layers(&self) -> u8 {
        self.velocity_layers
    }

    pub fn slots(&self) -> &BTreeMap<MappingKey, PathBuf> {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The sample in a slot.
    pub fn get(&self, key: MappingKey) -> Option<&Sample> {
        self.slots.get(&key).and_then(|path| self.pool.get(path))
    }

    /// The slot a sample occupies.
    pub fn key_of(&self, path: &Path) -> Option<MappingKey> {
        self.slots
            .iter()
            .find(|(_, occupant)| occupant.as_path() == path)
            .map(|(key, _)| *key)
    }

    /// Occupied slots with their samples, in key order.
    pub fn entries(&self) -> impl Iterator<Item = (MappingKey, &Sample)> {
        self.slots
            .iter()
            .filter_map(|(key, path)| self.pool.get(path).map(|sample| (*key, sample)))
    }

    fn validate_key(&self, key: MappingKey) -> Result<(), MappingError> {
        if !midi::is_piano_note(key.note) {
            return Err(MappingError::NoteOutOfRange(key.note));
        }
        if key.layer >= self.velocity_layers {
            return Err(MappingError::LayerOutOfRange {
                layer: key.layer,
                layers: self.velocity_layers,
            });
        }
        Ok(())
    }

    fn set_mapped(&mut self, path: &Path, mapped: bool) {
        if let Some(sample) = self.pool.get_mut(path) {
            sample.set_mapped(mapped);
        }
    }

    /// Removes whatever is in the slot, clearing its flag.
    fn vacate(&mut self, key: MappingKey) -> Option<PathBuf> {
        let occupant = self.slots.remove(&key)?;
        self.set_mapped(&occupant, false);
        Some(occupant)
    }

    /// Removes the sample from its slot, if it has one.
    pub fn unmap(&mut self, path: &Path) -> Option<MappingKey> {
        let key = self.key_of(path)?;
        self.vacate(key);
        Some(key)
    }

    /// Places a sample in a slot, moving it out of any slot it held before. Returns the
    /// sample displaced from the target slot.
    pub fn add(
        &mut self,
        path: &Path,
        key: MappingKey,
        policy: ConflictPolicy,
    ) -> Result<Option<PathBuf>, MappingError> {
        self.validate_key(key)?;
        if !self.pool.contains(path) {
            return Err(MappingError::UnknownSample(path.to_path_buf()));
        }

        let current = self.slots.get(&key).cloned();
        let displaced = match current {
            Some(occupant) if occupant.as_path() == path => return Ok(None),
            Some(occupant) if policy == ConflictPolicy::Reject => {
                return Err(MappingError::SlotOccupied { key, occupant })
            }
            Some(_) => self.vacate(key),
            None => None,
        };

        self.unmap(path);
        self.slots.insert(key, path.to_path_buf());
        self.set_mapped(path, true);
        debug!(path = ?path, key = %key, "Mapped sample");
        Ok(displaced)
    }

    /// Empties a slot and returns its former occupant.
    pub fn remove(&mut self, key: MappingKey) -> Result<PathBuf, MappingError> {
        self.vacate(key).ok_or(MappingError::EmptySlot(key))
    }

    /// Moves the occupant of `from` to `to`. Returns the sample displaced from `to`.
    pub fn move_mapping(
        &mut self,
        from: MappingKey,
        to: MappingKey,
        policy: ConflictPolicy,
    ) -> Result<Option<PathBuf>, MappingError> {
        let path = self
            .slots
            .get(&from)
            .cloned()
            .ok_or(MappingError::EmptySlot(from))?;
        if from == to {
            return Ok(None);
        }
        self.add(&path, to, policy)
    }

    /// Empties every slot. Returns how many were occupied.
    pub fn clear(&mut self) -> usize {
        let keys: Vec<MappingKey> = self.slots.keys().copied().collect();
        for key in &keys {
            self.vacate(*key);
        }
        keys.len()
    }

    /// Changes the layer count, unmapping samples in layers that no longer exist.
    pub fn set_velocity_layers(&mut self, layers: u8) -> Vec<MappingKey> {
        self.velocity_layers = layers.max(1);
        let removed: Vec<MappingKey> = self
            .slots
            .keys()
            .filter(|key| key.layer >= self.velocity_layers)
            .copied()
            .collect();
        for key in &removed {
            self.vacate(*key);
        }
        removed
    }

    /// Replaces the pool. All slots are emptied.
    pub fn replace_pool(&mut self, pool: SamplePool) {
        self.slots.clear();
        self.pool = pool;
        for sample in self.pool.iter_mut() {
            sample.set_mapped(false);
        }
    }

    /// Writes updated copies of pooled samples back, e.g. after analysis. The slot table
    /// decides each sample's `mapped` flag. Samples not in the pool are ignored.
    pub fn update_samples(&mut self, samples: Vec<Sample>) {
        for mut sample in samples {
            let mapped = self.key_of(sample.path()).is_some();
            match self.pool.get_mut(sample.path()) {
                Some(existing) => {
                    sample.set_mapped(mapped);
                    sample.set_disabled(existing.disabled());
                    *existing = sample;
                }
                None => warn!(path = ?sample.path(), "Ignoring update for unknown sample"),
            }
        }
    }

    /// Recomputes every sample's filtered flag.
    pub fn set_amplitude_filter(&mut self, bounds: Option<(f64, f64)>) {
        for sample in self.pool.iter_mut() {
            sample.apply_amplitude_filter(bounds);
        }
    }

    pub fn set_disabled(&mut self, path: &Path, disabled: bool) -> Result<(), MappingError> {
        let sample = self
            .pool
            .get_mut(path)
            .ok_or_else(|| MappingError::UnknownSample(path.to_path_buf()))?;
        sample.set_disabled(disabled);
        Ok(())
    }

    /// Sets a sample's note by hand. If it was mapped under a different note it is
    /// unmapped; the vacated slot is returned.
    pub fn override_pitch(
        &mut self,
        path: &Path,
        note: u8,
    ) -> Result<Option<MappingKey>, MappingError> {
        if !midi::is_piano_note(note) {
            return Err(MappingError::NoteOutOfRange(note));
        }
        let sample = self
            .pool
            .get_mut(path)
            .ok_or_else(|| MappingError::UnknownSample(path.to_path_buf()))?;
        sample.set_manual_pitch(note);

        match self.key_of(path) {
            Some(key) if key.note != note => {
                self.vacate(key);
                Ok(Some(key))
            }
            _ => Ok(None),
        }
    }

    /// The slot table keyed by `"<note>,<layer>"` with content hashes as values.
    pub fn to_hashes(&self) -> BTreeMap<String, String> {
        let mut hashes = BTreeMap::new();
        for (key, sample) in self.entries() {
            match sample.hash() {
                Some(hash) => {
                    hashes.insert(key.to_string(), hash.to_string());
                }
                None => warn!(path = ?sample.path(), key = %key, "Mapped sample has no hash"),
            }
        }
        hashes
    }

    /// Rebuilds the slot table from persisted hashes. Entries that do not parse, do not
    /// fit the grid, or whose hash matches no free sample are dropped. Returns the number
    /// restored.
    pub fn restore_from_hashes(&mut self, hashes: &BTreeMap<String, String>) -> usize {
        self.clear();
        let mut restored = 0;
        for (raw_key, hash) in hashes {
            let key = match raw_key.parse::<MappingKey>() {
                Ok(key) => key,
                Err(e) => {
                    warn!(key = %raw_key, err = %e, "Dropping unparseable mapping entry");
                    continue;
                }
            };
            if let Err(e) = self.validate_key(key) {
                warn!(key = %key, err = %e, "Dropping mapping entry outside the grid");
                continue;
            }
            let path = self
                .pool
                .find_by_hash(hash)
                .find(|sample| !sample.mapped())
                .map(|sample| sample.path().to_path_buf());
            match path {
                Some(path) => {
                    self.slots.insert(key, path.clone());
                    self.set_mapped(&path, true);
                    restored += 1;
                }
                None => warn!(
                    key = %key,
                    hash = %short_hash(hash),
                    "Dropping mapping entry for missing sample"
                ),
            }
        }
        restored
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testutil::analyzed_sample;

    /// Every slot holds a distinct pooled sample and `mapped` matches the slot table.
    pub(crate) fn assert_consistent(manager: &MappingManager) {
        let mut seen = std::collections::HashSet::new();
        for path in manager.slots().values() {
            assert!(seen.insert(path.clone()), "{:?} occupies two slots", path);
            assert!(manager.pool().contains(path));
        }
        for sample in manager.pool().iter() {
            assert_eq!(
                seen.contains(sample.path()),
                sample.mapped(),
                "mapped flag out of sync for {:?}",
                sample.path()
            );
        }
    }

    fn manager() -> MappingManager {
        MappingManager::new(
            SamplePool::new(vec![
                analyzed_sample("/s/a.wav", 60, 0.1),
                analyzed_sample("/s/b.wav", 60, 0.2),
                analyzed_sample("/s/c.wav", 61, 0.3),
            ]),
            4,
        )
    }

    fn key(note: u8, layer: u8) -> MappingKey {
        MappingKey::new(note, layer)
    }

    #[test]
    fn test_add_and_conflicts() {
        let mut manager = manager();
        let a = Path::new("/s/a.wav");
        let b = Path::new("/s/b.wav");

        assert_eq!(Ok(None), manager.add(a, key(60, 0), ConflictPolicy::Reject));
        assert!(manager.pool().get(a).unwrap().mapped());

        assert_eq!(
            Err(MappingError::SlotOccupied {
                key: key(60, 0),
                occupant: a.to_path_buf()
            }),
            manager.add(b, key(60, 0), ConflictPolicy::Reject)
        );
        assert!(!manager.pool().get(b).unwrap().mapped());

        assert_eq!(
            Ok(Some(a.to_path_buf())),
            manager.add(b, key(60, 0), ConflictPolicy::Replace)
        );
        assert!(!manager.pool().get(a).unwrap().mapped());
        assert_consistent(&manager);
    }

    #[test]
    fn test_add_same_sample_twice_moves_it() {
        let mut manager = manager();
        let a = Path::new("/s/a.wav");
        manager.add(a, key(60, 0), ConflictPolicy::Reject).unwrap();
        manager.add(a, key(60, 3), ConflictPolicy::Reject).unwrap();
        assert_eq!(1, manager.len());
        assert_eq!(Some(key(60, 3)), manager.key_of(a));
        assert_eq!(Ok(None), manager.add(a, key(60, 3), ConflictPolicy::Reject));
        assert_consistent(&manager);
    }

    #[test]
    fn test_add_validation() {
        let mut manager = manager();
        let a = Path::new("/s/a.wav");
        assert_eq!(
            Err(MappingError::NoteOutOfRange(20)),
            manager.add(a, key(20, 0), ConflictPolicy::Reject)
        );
        assert_eq!(
            Err(MappingError::LayerOutOfRange {
                layer: 4,
                layers: 4
            }),
            manager.add(a, key(60, 4), ConflictPolicy::Reject)
        );
        assert!(matches!(
            manager.add(Path::new("/s/zzz.wav"), key(60, 0), ConflictPolicy::Reject),
            Err(MappingError::UnknownSample(_))
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_remove_and_move() {
        let mut manager = manager();
        let a = Path::new("/s/a.wav");
        let b = Path::new("/s/b.wav");
        manager.add(a, key(60, 0), ConflictPolicy::Reject).unwrap();
        manager.add(b, key(60, 1), ConflictPolicy::Reject).unwrap();

        assert!(matches!(
            manager.move_mapping(key(60, 0), key(60, 1), ConflictPolicy::Reject),
            Err(MappingError::SlotOccupied { .. })
        ));
        assert_eq!(
            Ok(Some(b.to_path_buf())),
            manager.move_mapping(key(60, 0), key(60, 1), ConflictPolicy::Replace)
        );
        assert_eq!(Some(key(60, 1)), manager.key_of(a));
        assert!(manager.get(key(60, 0)).is_none());
        assert_consistent(&manager);

        assert_eq!(
            Err(MappingError::EmptySlot(key(60, 2))),
            manager.move_mapping(key(60, 2), key(60, 3), ConflictPolicy::Reject)
        );

        assert_eq!(Ok(a.to_path_buf()), manager.remove(key(60, 1)));
        assert_eq!(Err(MappingError::EmptySlot(key(60, 1))), manager.remove(key(60, 1)));
        assert!(!manager.pool().get(a).unwrap().mapped());
        assert_consistent(&manager);
    }

    #[test]
    fn test_set_velocity_layers_drops_high_layers() {
        let mut manager = manager();
        manager
            .add(Path::new("/s/a.wav"), key(60, 0), ConflictPolicy::Reject)
            .unwrap();
        manager
            .add(Path::new("/s/b.wav"), key(60, 3), ConflictPolicy::Reject)
            .unwrap();

        assert_eq!(vec![key(60, 3)], manager.set_velocity_layers(2));
        assert_eq!(1, manager.len());
        assert!(!manager.pool().get(Path::new("/s/b.wav")).unwrap().mapped());
        assert_consistent(&manager);
    }

    #[test]
    fn test_hash_round_trip_and_dropped_entries() {
        let mut manager = manager();
        manager
            .add(Path::new("/s/a.wav"), key(60, 0), ConflictPolicy::Reject)
            .unwrap();
        manager
            .add(Path::new("/s/c.wav"), key(61, 2), ConflictPolicy::Reject)
            .unwrap();
        let mut hashes = manager.to_hashes();
        assert_eq!(Some(&"hash-/s/a.wav".to_string()), hashes.get("60,0"));

        hashes.insert("62,0".to_string(), "deleted-file".to_string());
        hashes.insert("bogus".to_string(), "hash-/s/b.wav".to_string());
        hashes.insert("61,9".to_string(), "hash-/s/b.wav".to_string());

        let mut restored = MappingManager::new(manager.pool().clone(), 4);
        assert_eq!(2, restored.restore_from_hashes(&hashes));
        assert_eq!(manager.slots(), restored.slots());
        assert_consistent(&restored);
    }

    #[test]
    fn test_override_pitch_vacates_on_note_change() {
        let mut manager = manager();
        let a = Path::new("/s/a.wav");
        manager.add(a, key(60, 0), ConflictPolicy::Reject).unwrap();

        assert_eq!(Ok(None), manager.override_pitch(a, 60));
        assert_eq!(Some(key(60, 0)), manager.key_of(a));

        assert_eq!(Ok(Some(key(60, 0))), manager.override_pitch(a, 62));
        assert_eq!(None, manager.key_of(a));
        assert_eq!(Some(62), manager.pool().get(a).unwrap().detected_midi());
        assert_eq!(Err(MappingError::NoteOutOfRange(5)), manager.override_pitch(a, 5));
        assert_consistent(&manager);
    }

    #[test]
    fn test_update_samples_keeps_flags() {
        let mut manager = manager();
        let a = Path::new("/s/a.wav");
        manager.add(a, key(60, 0), ConflictPolicy::Reject).unwrap();
        manager.set_disabled(a, true).unwrap();

        let mut updated = analyzed_sample("/s/a.wav", 60, 0.9);
        updated.set_mapped(false);
        manager.update_samples(vec![updated, analyzed_sample("/s/new.wav", 60, 0.1)]);

        let sample = manager.pool().get(a).unwrap();
        assert!(sample.mapped());
        assert!(sample.disabled());
        assert_eq!(Some(0.9), sample.velocity_amplitude());
        assert_eq!(3, manager.pool().len());
        assert_consistent(&manager);
    }
}
