//! Local filesystem Storage implementation for the desktop simulator.
//!
//! `LocalFileStorage` implements `platform::Storage` using `std::fs`.
//! Used when the `std` feature is enabled (host builds only).
//! All paths are resolved relative to the music root provided at construction.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use heapless::String;

use crate::config::MUSIC_PATH_ENV;
use crate::storage::{matches_pattern, DirEntry, File, Storage};

/// Error type for local filesystem operations.
#[derive(Debug)]
pub struct LocalStorageError(pub std::io::Error);

impl core::fmt::Display for LocalStorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "local storage error: {}", self.0)
    }
}

impl std::error::Error for LocalStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// An open file on the local filesystem.
pub struct LocalFile {
    inner: fs::File,
    size: u64,
}

impl File for LocalFile {
    type Error = LocalStorageError;

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Read::read(&mut self.inner, buf).map_err(LocalStorageError)
    }

    async fn seek(&mut self, pos: u64) -> Result<u64, Self::Error> {
        Seek::seek(&mut self.inner, SeekFrom::Start(pos)).map_err(LocalStorageError)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(self) -> Result<(), Self::Error> {
        drop(self.inner);
        Ok(())
    }
}

/// Snapshot of a directory scan, sorted by name so catalog order is stable.
pub struct LocalDir {
    entries: std::vec::IntoIter<DirEntry>,
}

/// A `platform::Storage` implementation backed by `std::fs`.
///
/// # Example
/// ```no_run
/// # async fn example() {
/// use platform::storage_local::LocalFileStorage;
/// use platform::Storage;
/// let mut storage = LocalFileStorage::new("/home/user/music");
/// let file = storage.open_file("track01.mp3").await.unwrap();
/// # }
/// ```
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Create a new storage rooted at `music_root`.
    #[must_use]
    pub fn new(music_root: &str) -> Self {
        Self { root: PathBuf::from(music_root) }
    }

    /// Create from the `MUSIC_PATH` environment variable.
    ///
    /// Returns `None` if `MUSIC_PATH` is not set or is not valid UTF-8.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(MUSIC_PATH_ENV).ok().map(|p| Self::new(&p))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Storage for LocalFileStorage {
    type Error = LocalStorageError;
    type File = LocalFile;
    type Dir = LocalDir;

    async fn open_file(&mut self, path: &str) -> Result<Self::File, Self::Error> {
        let full = self.resolve(path);
        let file = fs::File::open(&full).map_err(LocalStorageError)?;
        let meta = file.metadata().map_err(LocalStorageError)?;
        Ok(LocalFile { inner: file, size: meta.len() })
    }

    async fn find_first(&mut self, pattern: &str) -> Result<Self::Dir, Self::Error> {
        let mut entries = Vec::new();
        for item in fs::read_dir(&self.root).map_err(LocalStorageError)? {
            let item = item.map_err(LocalStorageError)?;
            let meta = item.metadata().map_err(LocalStorageError)?;
            let os_name = item.file_name();
            // Names that are not UTF-8 or exceed MAX_NAME_LEN are not addressable.
            let Some(raw) = os_name.to_str() else { continue };
            let Ok(name) = String::try_from(raw) else { continue };
            if matches_pattern(pattern, raw) {
                entries.push(DirEntry { name, size: meta.len(), is_dir: meta.is_dir() });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(LocalDir { entries: entries.into_iter() })
    }

    async fn find_next(&mut self, dir: &mut Self::Dir) -> Result<Option<DirEntry>, Self::Error> {
        Ok(dir.entries.next())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::{File, Storage};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_storage_read_full_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("test.bin"), b"hello world").unwrap();
        let mut storage = LocalFileStorage::new(tmp.path().to_str().unwrap());
        let mut file = storage.open_file("test.bin").await.unwrap();
        let mut buf = [0u8; 11];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
        file.close().await.unwrap();
    }

    #[tokio::test]
    async fn local_storage_seek_and_read() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("seek.bin"), b"ABCDEFGH").unwrap();
        let mut storage = LocalFileStorage::new(tmp.path().to_str().unwrap());
        let mut file = storage.open_file("seek.bin").await.unwrap();
        assert_eq!(file.size(), 8);
        file.seek(4).await.unwrap();
        let mut buf = [0u8; 4];
        file.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"EFGH");
    }

    #[tokio::test]
    async fn local_storage_open_missing_fails() {
        let tmp = TempDir::new().unwrap();
        let mut storage = LocalFileStorage::new(tmp.path().to_str().unwrap());
        assert!(storage.open_file("missing.mp3").await.is_err());
    }

    #[tokio::test]
    async fn local_storage_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.mp3"), [0u8; 10]).unwrap();
        fs::write(tmp.path().join("a.MP3"), [0u8; 20]).unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        let mut storage = LocalFileStorage::new(tmp.path().to_str().unwrap());

        let mut dir = storage.find_first("*.mp3").await.unwrap();
        let first = storage.find_next(&mut dir).await.unwrap().unwrap();
        let second = storage.find_next(&mut dir).await.unwrap().unwrap();
        assert_eq!(first.name.as_str(), "a.MP3");
        assert_eq!(first.size, 20);
        assert_eq!(second.name.as_str(), "b.mp3");
        assert!(storage.find_next(&mut dir).await.unwrap().is_none());
    }
}
