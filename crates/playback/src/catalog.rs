//! Bounded list of playable tracks discovered on the storage volume.

use heapless::Vec;
use platform::{File, Storage};

use crate::config::CATALOG_CAPACITY;
use crate::error::PlayerError;
use crate::metadata::{Id3v1Tag, Id3v2Header, TrackMetadata, ID3V1_TAG_LEN, ID3V2_HEADER_LEN};
use crate::track::TrackDescriptor;

/// Ordered tracks found by the last [`refresh`](SongCatalog::refresh).
///
/// The list is only ever replaced as a whole; entries are never edited.
#[derive(Debug, Clone, Default)]
pub struct SongCatalog<const N: usize = CATALOG_CAPACITY> {
    tracks: Vec<TrackDescriptor, N>,
}

impl<const N: usize> SongCatalog<N> {
    /// Empty catalog.
    pub const fn new() -> Self {
        Self { tracks: Vec::new() }
    }

    /// Rescan storage for files matching `pattern` and replace the catalog.
    ///
    /// Directories, hidden files (leading `.`) and names longer than a track
    /// path can hold are skipped. Returns the number of tracks found.
    ///
    /// # Errors
    ///
    /// - [`PlayerError::StorageFault`] if the scan fails; the previous catalog
    ///   is kept
    /// - [`PlayerError::CatalogOverflow`] if more than `N` tracks match; the
    ///   catalog holds the first `N`
    pub async fn refresh<S: Storage>(
        &mut self,
        storage: &mut S,
        pattern: &str,
    ) -> Result<usize, PlayerError> {
        let mut dir = storage.find_first(pattern).await.map_err(|_| {
            warn!("catalog: directory scan failed to start");
            PlayerError::StorageFault
        })?;

        let mut found: Vec<TrackDescriptor, N> = Vec::new();
        let mut overflow = false;
        while let Some(entry) = storage.find_next(&mut dir).await.map_err(|_| {
            warn!("catalog: directory scan failed");
            PlayerError::StorageFault
        })? {
            if entry.is_dir || entry.name.starts_with('.') {
                continue;
            }
            let Ok(track) = TrackDescriptor::new(&entry.name, entry.size) else {
                warn!("catalog: skipping {}, path too long", entry.name.as_str());
                continue;
            };
            if found.push(track).is_err() {
                overflow = true;
                break;
            }
        }

        self.tracks = found;
        info!("catalog: {} tracks", self.tracks.len());
        if overflow {
            warn!("catalog: more than {} tracks, list truncated", N);
            return Err(PlayerError::CatalogOverflow { capacity: N });
        }
        Ok(self.tracks.len())
    }

    /// Track at `index`.
    pub fn get(&self, index: usize) -> Option<&TrackDescriptor> {
        self.tracks.get(index)
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// `true` when no tracks were found.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Maximum number of tracks.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Tracks in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackDescriptor> {
        self.tracks.iter()
    }

    /// Read the ID3v2 header and ID3v1 trailer of the track at `index`.
    pub async fn read_metadata<S: Storage>(
        &self,
        storage: &mut S,
        index: usize,
    ) -> Result<TrackMetadata, PlayerError> {
        let track = self.get(index).ok_or(PlayerError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        let mut file = storage
            .open_file(track.path())
            .await
            .map_err(|_| PlayerError::StorageFault)?;

        let result = read_tags(&mut file).await;
        let closed = file.close().await.map_err(|_| PlayerError::StorageFault);
        let metadata = result?;
        closed?;
        Ok(metadata)
    }
}

async fn read_tags<F: File>(file: &mut F) -> Result<TrackMetadata, PlayerError> {
    let size = file.size();
    let mut metadata = TrackMetadata::default();

    let mut header = [0u8; ID3V2_HEADER_LEN];
    if read_at(file, 0, &mut header).await? == header.len() {
        metadata.id3v2 = Id3v2Header::parse(&header);
    }

    let tail = ID3V1_TAG_LEN as u64;
    if size >= tail {
        let mut trailer = [0u8; ID3V1_TAG_LEN];
        if read_at(file, size.saturating_sub(tail), &mut trailer).await? == trailer.len() {
            metadata.id3v1 = Id3v1Tag::parse(&trailer);
        }
    }
    Ok(metadata)
}

/// Fill `buf` from `offset`, stopping early at end of file.
async fn read_at<F: File>(file: &mut F, offset: u64, buf: &mut [u8]) -> Result<usize, PlayerError> {
    file.seek(offset)
        .await
        .map_err(|_| PlayerError::StorageFault)?;
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        let n = file.read(rest).await.map_err(|_| PlayerError::StorageFault)?;
        if n == 0 {
            break;
        }
        filled = filled.saturating_add(n);
    }
    Ok(filled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use platform::mocks::MemoryStorage;

    #[tokio::test]
    async fn test_refresh_skips_dirs_and_hidden_files() {
        let mut storage = MemoryStorage::new()
            .with_file("b.mp3", vec![0; 10])
            .with_file("a.mp3", vec![0; 20])
            .with_file(".hidden.mp3", vec![0; 5])
            .with_file("notes.txt", vec![0; 5])
            .with_dir("album.mp3");
        let mut catalog: SongCatalog = SongCatalog::new();

        assert_eq!(catalog.refresh(&mut storage, "*.mp3").await, Ok(2));
        let paths: std::vec::Vec<&str> = catalog.iter().map(TrackDescriptor::path).collect();
        assert_eq!(paths, ["b.mp3", "a.mp3"]);
        assert_eq!(catalog.get(1).unwrap().size_bytes(), 20);
    }

    #[tokio::test]
    async fn test_refresh_overflow_keeps_first_entries() {
        let mut storage = MemoryStorage::new();
        for i in 0..5 {
            storage.insert(&format!("{i}.mp3"), vec![0; 4]);
        }
        let mut catalog: SongCatalog<3> = SongCatalog::new();

        assert_eq!(
            catalog.refresh(&mut storage, "*.mp3").await,
            Err(PlayerError::CatalogOverflow { capacity: 3 })
        );
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get(0).unwrap().path(), "0.mp3");
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_previous_catalog() {
        let mut storage = MemoryStorage::new().with_file("a.mp3", vec![0; 4]);
        let mut catalog: SongCatalog = SongCatalog::new();
        catalog.refresh(&mut storage, "*.mp3").await.unwrap();

        storage.fail_scan(true);
        assert_eq!(
            catalog.refresh(&mut storage, "*.mp3").await,
            Err(PlayerError::StorageFault)
        );
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_read_metadata_finds_both_tags() {
        let mut data = vec![b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 6];
        data.extend_from_slice(&[0u8; 6]);
        data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        let mut trailer = [0u8; ID3V1_TAG_LEN];
        trailer[..3].copy_from_slice(b"TAG");
        trailer[3..8].copy_from_slice(b"Title");
        data.extend_from_slice(&trailer);

        let mut storage = MemoryStorage::new().with_file("t.mp3", data);
        let mut catalog: SongCatalog = SongCatalog::new();
        catalog.refresh(&mut storage, "*.mp3").await.unwrap();

        let meta = catalog.read_metadata(&mut storage, 0).await.unwrap();
        assert_eq!(meta.audio_offset(), 16);
        assert_eq!(meta.title(), Some("Title"));
        assert_eq!(storage.log().closes, 1);
    }

    #[tokio::test]
    async fn test_read_metadata_rejects_bad_index() {
        let mut storage = MemoryStorage::new();
        let catalog: SongCatalog = SongCatalog::new();
        assert_eq!(
            catalog.read_metadata(&mut storage, 0).await,
            Err(PlayerError::IndexOutOfRange { index: 0, len: 0 })
        );
    }
}
