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
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::sample::Sample;

/// The in-memory samples of a session, sorted by path. Paths are unique.
#[derive(Debug, Default, Clone)]
pub struct SamplePool {
    samples: Vec<Sample>,
    index: HashMap<PathBuf, usize>,
}

impl SamplePool {
    /// Builds a pool; later duplicates of a path are dropped.
    pub fn new(mut samples: Vec<Sample>) -> SamplePool {
        samples.sort_by(|a, b| a.path().cmp(b.path()));
        samples.dedup_by(|a, b| a.path() == b.path());
        let index = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| (sample.path().to_path_buf(), i))
            .collect();
        SamplePool { samples, index }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in path order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn get(&self, path: &Path) -> Option<&Sample> {
        self.index.get(path).map(|i| &self.samples[*i])
    }

    pub(crate) fn get_mut(&mut self, path: &Path) -> Option<&mut Sample> {
        self.index.get(path).map(|i| &mut self.samples[*i])
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Sample> {
        self.samples.iter_mut()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    /// Samples whose content hash matches, in path order.
    pub fn find_by_hash<'a>(&'a self, hash: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples
            .iter()
            .filter(move |sample| sample.hash() == Some(hash))
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_and_deduplicated() {
        let pool = SamplePool::new(vec![
            Sample::new(PathBuf::from("/s/c.wav")),
            Sample::new(PathBuf::from("/s/a.wav")),
            Sample::new(PathBuf::from("/s/c.wav")),
            Sample::new(PathBuf::from("/s/b.wav")),
        ]);
        let names: Vec<&str> = pool.iter().map(|s| s.filename()).collect();
        assert_eq!(vec!["a.wav", "b.wav", "c.wav"], names);
        assert!(pool.contains(Path::new("/s/b.wav")));
        assert_eq!("c.wav", pool.get(Path::new("/s/c.wav")).unwrap().filename());
    }

    #[test]
    fn test_find_by_hash() {
        let mut a = Sample::new(PathBuf::from("/s/a.wav"));
        a.set_hash("same".to_string());
        let mut b = Sample::new(PathBuf::from("/s/b.wav"));
        b.set_hash("same".to_string());
        let pool = SamplePool::new(vec![b, a, Sample::new(PathBuf::from("/s/c.wav"))]);

        let found: Vec<&str> = pool.find_by_hash("same").map(|s| s.filename()).collect();
        assert_eq!(vec!["a.wav", "b.wav"], found);
        assert_eq!(0, pool.find_by_hash("other").count());
    }
}
