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
//! Coverage of the note by velocity grid.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::mapping::MappingKey;
use crate::midi;

/// Filled and missing layers of one note.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteCoverage {
    pub note: u8,
    pub filled: Vec<u8>,
    pub missing: Vec<u8>,
}

/// Summary of how much of the mapped note range holds samples.
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageSummary {
    /// Lowest and highest mapped note, None for an empty mapping.
    pub range: Option<(u8, u8)>,
    pub velocity_layers: u8,
    pub total_possible: usize,
    pub assigned: usize,
    pub missing: usize,
    pub percent: f64,
    /// Every note in the range, ascending.
    pub notes: Vec<NoteCoverage>,
    /// Notes grouped by how many layers they lack, most missing first. Complete notes
    /// are not listed.
    pub missing_groups: Vec<(usize, Vec<u8>)>,
}

/// Builds the coverage summary for the occupied slots. Slots whose layer is not below
/// `velocity_layers` are ignored.
pub fn report<'a, I>(keys: I, velocity_layers: u8) -> CoverageSummary
where
    I: IntoIterator<Item = &'a MappingKey>,
{
    let mut filled: BTreeMap<u8, BTreeSet<u8>> = BTreeMap::new();
    for key in keys {
        if key.layer < velocity_layers {
            filled.entry(key.note).or_default().insert(key.layer);
        }
    }

    let range = match (filled.keys().next(), filled.keys().next_back()) {
        (Some(low), Some(high)) => Some((*low, *high)),
        _ => None,
    };
    let Some((low, high)) = range else {
        return CoverageSummary {
            range: None,
            velocity_layers,
            total_possible: 0,
            assigned: 0,
            missing: 0,
            percent: 0.0,
            notes: Vec::new(),
            missing_groups: Vec::new(),
        };
    };

    let notes: Vec<NoteCoverage> = (low..=high)
        .map(|note| {
            let layers = filled.get(&note);
            let (filled, missing): (Vec<u8>, Vec<u8>) =
                (0..velocity_layers).partition(|layer| layers.is_some_and(|l| l.contains(layer)));
            NoteCoverage {
                note,
                filled,
                missing,
            }
        })
        .collect();

    let total_possible = notes.len() * velocity_layers as usize;
    let assigned: usize = notes.iter().map(|n| n.filled.len()).sum();

    let mut groups: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
    for note in notes.iter().filter(|n| !n.missing.is_empty()) {
        groups.entry(note.missing.len()).or_default().push(note.note);
    }

    CoverageSummary {
        range,
        velocity_layers,
        total_possible,
        assigned,
        missing: total_possible - assigned,
        percent: assigned as f64 * 100.0 / total_possible as f64,
        notes,
        missing_groups: groups.into_iter().rev().collect(),
    }
}

impl CoverageSummary {
    /// Notes lacking the given number of layers.
    pub fn notes_missing(&self, layers: usize) -> &[u8] {
        self.missing_groups
            .iter()
            .find(|(count, _)| *count == layers)
            .map(|(_, notes)| notes.as_slice())
            .unwrap_or(&[])
    }
}

fn note_list(notes: &[u8]) -> String {
    notes
        .iter()
        .map(|note| format!("{} ({})", midi::note_name(*note), note))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for CoverageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Coverage report")?;
        writeln!(f, "===============")?;
        let Some((low, high)) = self.range else {
            writeln!(f, "No samples are mapped; coverage is 0%.")?;
            return Ok(());
        };
        writeln!(
            f,
            "Range: {} ({}) to {} ({})",
            midi::note_name(low),
            low,
            midi::note_name(high),
            high
        )?;
        writeln!(f, "Velocity layers: {}", self.velocity_layers)?;
        writeln!(f, "Total slots: {}", self.total_possible)?;
        writeln!(f, "Assigned: {}", self.assigned)?;
        writeln!(f, "Missing: {}", self.missing)?;
        writeln!(f, "Coverage: {:.1}%", self.percent)?;

        if self.missing_groups.is_empty() {
            writeln!(f)?;
            writeln!(f, "Every note in the range is complete.")?;
            return Ok(());
        }
        writeln!(f)?;
        writeln!(f, "Notes needing samples:")?;
        for (count, notes) in &self.missing_groups {
            let noun = if *count == 1 { "layer" } else { "layers" };
            writeln!(f, "  {} {} missing: {}", count, noun, note_list(notes))?;
        }
        Ok(())
    }
}
