//! Immutable descriptor of one playable file.

use heapless::String;

use crate::config::MAX_PATH_LEN;
use crate::error::PlayerError;

/// Path and size of one MP3 file on the storage volume.
///
/// Immutable once created. The catalog owns the canonical copy; a clone
/// travels through the song queue to the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    path: String<MAX_PATH_LEN>,
    size_bytes: u64,
}

impl TrackDescriptor {
    /// Create a descriptor.
    ///
    /// # Errors
    ///
    /// [`PlayerError::PathTooLong`] when `path` exceeds [`MAX_PATH_LEN`] bytes.
    pub fn new(path: &str, size_bytes: u64) -> Result<Self, PlayerError> {
        let path = String::try_from(path).map_err(|_| PlayerError::PathTooLong)?;
        Ok(Self { path, size_bytes })
    }

    /// Path on the storage volume.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// File size in bytes as reported by the directory scan.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Number of `chunk_size` reads needed to cover the file:
    /// `ceil(size_bytes / chunk_size)`.
    pub fn chunk_count(&self, chunk_size: usize) -> u64 {
        let chunk = chunk_size as u64;
        if chunk == 0 {
            return 0;
        }
        self.size_bytes.div_ceil(chunk)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_rounds_up() {
        let track = TrackDescriptor::new("a.mp3", 2048).unwrap();
        assert_eq!(track.chunk_count(1024), 2);
        let track = TrackDescriptor::new("b.mp3", 2049).unwrap();
        assert_eq!(track.chunk_count(1024), 3);
        let track = TrackDescriptor::new("c.mp3", 0).unwrap();
        assert_eq!(track.chunk_count(1024), 0);
    }

    #[test]
    fn test_overlong_path_is_rejected() {
        let long = "x".repeat(MAX_PATH_LEN + 1);
        assert_eq!(TrackDescriptor::new(&long, 1), Err(PlayerError::PathTooLong));
        let exact = "y".repeat(MAX_PATH_LEN);
        assert_eq!(TrackDescriptor::new(&exact, 1).unwrap().path(), exact);
    }
}
