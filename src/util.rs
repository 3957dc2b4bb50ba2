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
use std::path::Path;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Returns the leading characters of a content hash for log output.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(8) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

/// Returns the lowercased extension of the path, if it has a readable one.
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::util::{filename_display, lowercase_extension, short_hash};

    #[test]
    fn test_filename_display() {
        assert_eq!("kick.wav", filename_display(Path::new("/samples/kick.wav")));
        assert_eq!("unreadable file name", filename_display(Path::new("/")));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!("0123abcd", short_hash("0123abcdef987654"));
        assert_eq!("abc", short_hash("abc"));
        assert_eq!("", short_hash(""));
    }

    #[test]
    fn test_lowercase_extension() {
        assert_eq!(Some("wav".to_string()), lowercase_extension(Path::new("a/B.WAV")));
        assert_eq!(Some("flac".to_string()), lowercase_extension(Path::new("a.Flac")));
        assert_eq!(None, lowercase_extension(Path::new("noext")));
    }
}
