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
pub mod analysis;
pub mod assign;
pub mod audio;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod export;
pub mod mapping;
pub mod midi;
pub mod sample;
pub mod session;
pub mod util;
pub mod workspace;

#[cfg(test)]
mod testutil;
