//! Storage abstraction for removable media (FAT volume on SD card)
//!
//! Mirrors the FatFs surface the player relies on: a pattern-filtered
//! directory scan (`find_first` / `find_next`), and open/seek/read/close on
//! individual files. Every operation can fail with the implementation's
//! error type when the card is absent or the read faults.

use heapless::String;

/// Longest file name a [`DirEntry`] can carry, in UTF-8 bytes.
pub const MAX_NAME_LEN: usize = 128;

/// One directory entry returned by a pattern scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name relative to the scanned directory
    pub name: String<MAX_NAME_LEN>,
    /// File size in bytes
    pub size: u64,
    /// `true` for sub-directories
    pub is_dir: bool,
}

/// Storage trait for file system access
pub trait Storage {
    /// Error type
    type Error: core::fmt::Debug;
    /// File type
    type File: File;
    /// Open directory-scan cursor, released on drop
    type Dir;

    /// Open file for reading
    fn open_file(
        &mut self,
        path: &str,
    ) -> impl core::future::Future<Output = Result<Self::File, Self::Error>>;

    /// Start a scan of the root directory for names matching `pattern`
    /// (`*` and `?` wildcards, ASCII case-insensitive).
    fn find_first(
        &mut self,
        pattern: &str,
    ) -> impl core::future::Future<Output = Result<Self::Dir, Self::Error>>;

    /// Next matching entry, or `None` once the scan is exhausted.
    fn find_next(
        &mut self,
        dir: &mut Self::Dir,
    ) -> impl core::future::Future<Output = Result<Option<DirEntry>, Self::Error>>;
}

/// File trait for reading files
pub trait File {
    /// Error type
    type Error: core::fmt::Debug;

    /// Read from current position; returns bytes read, `0` at end of file
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<usize, Self::Error>>;

    /// Seek to absolute position
    fn seek(&mut self, pos: u64) -> impl core::future::Future<Output = Result<u64, Self::Error>>;

    /// Get file size
    fn size(&self) -> u64;

    /// Close the file, releasing the handle on the volume
    fn close(self) -> impl core::future::Future<Output = Result<(), Self::Error>>;
}

/// FatFs-style wildcard match: `*` matches any run, `?` any single byte,
/// everything else compares ASCII case-insensitively.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    wildcard(pattern.as_bytes(), name.as_bytes())
}

fn wildcard(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => {
            (0..=name.len()).any(|skip| name.get(skip..).is_some_and(|tail| wildcard(rest, tail)))
        }
        Some((b'?', rest)) => name.split_first().is_some_and(|(_, tail)| wildcard(rest, tail)),
        Some((expected, rest)) => name
            .split_first()
            .is_some_and(|(got, tail)| got.eq_ignore_ascii_case(expected) && wildcard(rest, tail)),
    }
}
