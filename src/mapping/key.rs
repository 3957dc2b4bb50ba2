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
use std::fmt;
use std::str::FromStr;

/// A slot in the note by velocity grid. Orders by note, then layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingKey {
    pub note: u8,
    pub layer: u8,
}

impl MappingKey {
    pub fn new(note: u8, layer: u8) -> MappingKey {
        MappingKey { note, layer }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.note, self.layer)
    }
}

impl FromStr for MappingKey {
    type Err = String;

    /// Parses the persisted `"<midi>,<velocity>"` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (note, layer) = s
            .split_once(',')
            .ok_or_else(|| format!("mapping key {:?} is not <note>,<layer>", s))?;
        let note = note
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("invalid note in {:?}: {}", s, e))?;
        let layer = layer
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("invalid layer in {:?}: {}", s, e))?;
        Ok(MappingKey { note, layer })
    }
}
