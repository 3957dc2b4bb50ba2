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
//! Velocity auto-assignment by centre-based binning.
//!
//! For one note, the loudness range of the eligible samples is split into one bin per
//! velocity layer. Each layer takes the remaining sample closest to its bin centre,
//! first in pool (path) order on a tie. The picked samples are then laid onto the
//! picked layers in ascending loudness so louder layers never hold quieter samples.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::mapping::{ConflictPolicy, MappingKey, MappingManager};
use crate::midi::{self, PIANO_RANGE};

/// What to auto-assign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignTarget {
    Note(u8),
    All,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssignSummary {
    pub notes_touched: usize,
    pub samples_assigned: usize,
}

/// Runs auto-assignment against a mapping.
pub struct VelocityAutoAssigner<'a> {
    mapping: &'a mut MappingManager,
}

impl<'a> VelocityAutoAssigner<'a> {
    pub fn new(mapping: &'a mut MappingManager) -> VelocityAutoAssigner<'a> {
        VelocityAutoAssigner { mapping }
    }

    pub fn run(&mut self, target: AssignTarget) -> AssignSummary {
        match target {
            AssignTarget::Note(note) => {
                let assigned = self.assign_note(note);
                AssignSummary {
                    notes_touched: usize::from(assigned > 0),
                    samples_assigned: assigned,
                }
            }
            AssignTarget::All => self.assign_all(),
        }
    }

    /// Assigns eligible samples of one note to its velocity layers. Returns the number of
    /// samples placed.
    pub fn assign_note(&mut self, note: u8) -> usize {
        let placements = plan(self.mapping, note);
        let mut assigned = 0;
        for (layer, path) in placements {
            let key = MappingKey::new(note, layer);
            match self.mapping.add(&path, key, ConflictPolicy::Replace) {
                Ok(displaced) => {
                    if let Some(displaced) = displaced {
                        debug!(key = %key, displaced = ?displaced, "Replaced slot occupant");
                    }
                    assigned += 1;
                }
                Err(e) => debug!(key = %key, err = %e, "Skipping placement"),
            }
        }
        if assigned > 0 {
            debug!(note, name = %midi::note_name(note), assigned, "Auto-assigned note");
        }
        assigned
    }

    /// Assigns every note on the piano.
    pub fn assign_all(&mut self) -> AssignSummary {
        let mut summary = AssignSummary::default();
        for note in PIANO_RANGE {
            let assigned = self.assign_note(note);
            if assigned > 0 {
                summary.notes_touched += 1;
                summary.samples_assigned += assigned;
            }
        }
        info!(
            notes = summary.notes_touched,
            samples = summary.samples_assigned,
            "Auto-assigned all notes"
        );
        summary
    }
}

/// Decides the (layer, sample) placements for a note without touching the mapping.
fn plan(mapping: &MappingManager, note: u8) -> Vec<(u8, PathBuf)> {
    let mut remaining: Vec<(PathBuf, f64)> = mapping
        .pool()
        .iter()
        .filter(|sample| sample.is_eligible_for(note))
        .filter_map(|sample| {
            sample
                .velocity_amplitude()
                .map(|amplitude| (sample.path().to_path_buf(), amplitude))
        })
        .collect();
    if remaining.is_empty() {
        return Vec::new();
    }

    let min = remaining.iter().map(|(_, a)| *a).fold(f64::INFINITY, f64::min);
    let max = remaining
        .iter()
        .map(|(_, a)| *a)
        .fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![(0, remaining.swap_remove(0).0)];
    }

    let layers = mapping.velocity_layers();
    let range = max - min;
    let mut picked_layers = Vec::new();
    let mut picked = Vec::new();
    for layer in 0..layers {
        if remaining.is_empty() {
            break;
        }
        let centre = min + (layer as f64 + 0.5) / layers as f64 * range;
        let mut best = 0;
        for (i, (_, amplitude)) in remaining.iter().enumerate() {
            if (amplitude - centre).abs() < (remaining[best].1 - centre).abs() {
                best = i;
            }
        }
        picked_layers.push(layer);
        picked.push(remaining.remove(best));
    }

    picked.sort_by(|a, b| a.1.total_cmp(&b.1));
    picked_layers
        .into_iter()
        .zip(picked.into_iter().map(|(path, _)| path))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::mapping::tests::assert_consistent;
    use crate::mapping::SamplePool;
    use crate::sample::Sample;
    use crate::testutil::analyzed_sample;

    fn manager(samples: Vec<Sample>, layers: u8) -> MappingManager {
        MappingManager::new(SamplePool::new(samples), layers)
    }

    fn amplitudes_by_layer(manager: &MappingManager, note: u8) -> Vec<(u8, f64)> {
        manager
            .entries()
            .filter(|(key, _)| key.note == note)
            .map(|(key, sample)| (key.layer, sample.velocity_amplitude().unwrap()))
            .collect()
    }

    #[test]
    fn test_no_eligible_samples() {
        let mut manager = manager(vec![analyzed_sample("/s/a.wav", 61, 0.5)], 4);
        assert_eq!(0, VelocityAutoAssigner::new(&mut manager).assign_note(60));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_single_sample_goes_to_layer_zero() {
        let mut manager = manager(vec![analyzed_sample("/s/a.wav", 60, 0.5)], 4);
        assert_eq!(1, VelocityAutoAssigner::new(&mut manager).assign_note(60));
        assert_eq!(vec![(0, 0.5)], amplitudes_by_layer(&manager, 60));
    }

    #[test]
    fn test_equal_amplitudes_assign_first_only() {
        let mut manager = manager(
            vec![
                analyzed_sample("/s/b.wav", 60, 0.5),
                analyzed_sample("/s/a.wav", 60, 0.5),
            ],
            4,
        );
        assert_eq!(1, VelocityAutoAssigner::new(&mut manager).assign_note(60));
        assert_eq!(
            Some(MappingKey::new(60, 0)),
            manager.key_of(Path::new("/s/a.wav"))
        );
    }

    #[test]
    fn test_evenly_spread_samples() {
        let samples = (0..8)
            .map(|i| analyzed_sample(&format!("/s/{}.wav", i), 60, 0.1 + i as f64 * 0.1))
            .collect();
        let mut manager = manager(samples, 8);
        assert_eq!(8, VelocityAutoAssigner::new(&mut manager).assign_note(60));

        let layers = amplitudes_by_layer(&manager, 60);
        assert_eq!(8, layers.len());
        for (i, (layer, amplitude)) in layers.iter().enumerate() {
            assert_eq!(i as u8, *layer);
            assert!((amplitude - (0.1 + i as f64 * 0.1)).abs() < 1e-9);
        }
        assert_consistent(&manager);
    }

    #[test]
    fn test_monotonic_with_clustered_amplitudes() {
        let amplitudes = [0.01, 0.02, 0.03, 0.5, 0.52, 0.9, 0.95, 1.0, 0.04, 0.51];
        let samples = amplitudes
            .iter()
            .enumerate()
            .map(|(i, a)| analyzed_sample(&format!("/s/{:02}.wav", i), 60, *a))
            .collect();
        let mut manager = manager(samples, 4);
        assert_eq!(4, VelocityAutoAssigner::new(&mut manager).assign_note(60));

        let layers = amplitudes_by_layer(&manager, 60);
        assert_eq!(vec![0, 1, 2, 3], layers.iter().map(|(l, _)| *l).collect::<Vec<_>>());
        for pair in layers.windows(2) {
            assert!(pair[0].1 <= pair[1].1, "{:?}", layers);
        }
        assert_consistent(&manager);
    }

    #[test]
    fn test_fewer_samples_than_layers() {
        let mut manager = manager(
            vec![
                analyzed_sample("/s/a.wav", 60, 0.2),
                analyzed_sample("/s/b.wav", 60, 0.8),
                analyzed_sample("/s/c.wav", 60, 0.4),
            ],
            8,
        );
        assert_eq!(3, VelocityAutoAssigner::new(&mut manager).assign_note(60));
        let layers = amplitudes_by_layer(&manager, 60);
        assert_eq!(vec![(0, 0.2), (1, 0.4), (2, 0.8)], layers);
    }

    #[test]
    fn test_tie_break_prefers_pool_order() {
        // Both are equally far from the layer 0 centre (0.375) of [0.0, 1.5] over 2 layers.
        let mut manager = manager(
            vec![
                analyzed_sample("/s/b.wav", 60, 0.25),
                analyzed_sample("/s/a.wav", 60, 0.5),
                analyzed_sample("/s/c.wav", 60, 0.0),
                analyzed_sample("/s/d.wav", 60, 1.5),
            ],
            2,
        );
        assert_eq!(2, VelocityAutoAssigner::new(&mut manager).assign_note(60));
        assert_eq!(
            Some(MappingKey::new(60, 0)),
            manager.key_of(Path::new("/s/a.wav"))
        );
        assert_eq!(
            Some(MappingKey::new(60, 1)),
            manager.key_of(Path::new("/s/d.wav"))
        );
    }

    #[test]
    fn test_ineligible_samples_skipped() {
        let mut disabled = analyzed_sample("/s/a.wav", 60, 0.9);
        disabled.set_disabled(true);
        let mut unanalyzed = Sample::new(PathBuf::from("/s/b.wav"));
        unanalyzed.set_hash("b".to_string());
        let mut manager = manager(
            vec![
                disabled,
                unanalyzed,
                analyzed_sample("/s/c.wav", 60, 0.1),
                analyzed_sample("/s/d.wav", 60, 0.2),
            ],
            2,
        );
        manager.set_amplitude_filter(Some((0.15, 1.0)));

        assert_eq!(1, VelocityAutoAssigner::new(&mut manager).assign_note(60));
        assert_eq!(
            Some(MappingKey::new(60, 0)),
            manager.key_of(Path::new("/s/d.wav"))
        );
    }

    #[test]
    fn test_assign_all_is_idempotent() {
        let mut manager = manager(
            vec![
                analyzed_sample("/s/a.wav", 60, 0.2),
                analyzed_sample("/s/b.wav", 60, 0.8),
                analyzed_sample("/s/c.wav", 64, 0.3),
                analyzed_sample("/s/d.wav", 67, 0.3),
                analyzed_sample("/s/e.wav", 67, 0.6),
            ],
            4,
        );
        let first = VelocityAutoAssigner::new(&mut manager).run(AssignTarget::All);
        assert_eq!(
            AssignSummary {
                notes_touched: 3,
                samples_assigned: 5
            },
            first
        );
        let slots = manager.slots().clone();

        let second = VelocityAutoAssigner::new(&mut manager).run(AssignTarget::All);
        assert_eq!(AssignSummary::default(), second);
        assert_eq!(&slots, manager.slots());
        assert_consistent(&manager);
    }

    #[test]
    fn test_vacates_existing_occupant() {
        let mut manager = manager(
            vec![
                analyzed_sample("/s/a.wav", 60, 0.2),
                analyzed_sample("/s/b.wav", 60, 0.8),
                analyzed_sample("/s/manual.wav", 62, 0.5),
            ],
            2,
        );
        manager
            .add(
                Path::new("/s/manual.wav"),
                MappingKey::new(60, 0),
                ConflictPolicy::Reject,
            )
            .unwrap();

        let summary = VelocityAutoAssigner::new(&mut manager).run(AssignTarget::Note(60));
        assert_eq!(2, summary.samples_assigned);
        assert!(!manager.pool().get(Path::new("/s/manual.wav")).unwrap().mapped());
        assert_consistent(&manager);
    }
}
