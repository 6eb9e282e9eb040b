//! Mock implementations for testing
//!
//! [`MemoryStorage`] is an in-memory FAT volume: files are byte vectors keyed
//! by name, every open/seek/read/close is recorded in a shared [`StorageLog`]
//! for assertions, and faults can be injected per path.

use std::cell::RefCell;
use std::rc::Rc;

use heapless::String;

use crate::storage::{matches_pattern, DirEntry, File, Storage};

/// Error returned by [`MemoryStorage`] and [`MemoryFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStorageError {
    /// No file with that name exists.
    NotFound,
    /// A fault injected by the test.
    Injected,
}

/// One `read` call as seen by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRecord {
    /// File offset at the start of the read
    pub offset: u64,
    /// Buffer length passed by the caller
    pub requested: usize,
    /// Bytes actually returned
    pub returned: usize,
}

/// Everything the storage layer observed, in call order.
#[derive(Debug, Default, Clone)]
pub struct StorageLog {
    /// Paths passed to `open_file`
    pub opens: Vec<std::string::String>,
    /// Positions passed to `seek`
    pub seeks: Vec<u64>,
    /// Every `read`
    pub reads: Vec<ReadRecord>,
    /// Number of `close` calls
    pub closes: usize,
    /// Number of directory scans started
    pub scans: usize,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    name: std::string::String,
    data: Rc<Vec<u8>>,
    /// Size reported by the directory scan; defaults to `data.len()`.
    listed_size: u64,
    is_dir: bool,
}

/// In-memory storage volume.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Vec<MemoryEntry>,
    log: Rc<RefCell<StorageLog>>,
    fail_open: Option<std::string::String>,
    fail_read_at: Option<u64>,
    fail_scan: bool,
}

impl MemoryStorage {
    /// Create an empty volume.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a file.
    #[must_use]
    pub fn with_file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.insert(name, data);
        self
    }

    /// Add a file whose bytes are `0, 1, 2, …` wrapping at 256.
    #[must_use]
    pub fn with_counting_file(self, name: &str, len: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)] // wrap at 256 is the point
        let data = (0..len).map(|i| i as u8).collect();
        self.with_file(name, data)
    }

    /// Add a sub-directory entry (never opened, only listed).
    #[must_use]
    pub fn with_dir(mut self, name: &str) -> Self {
        self.entries.push(MemoryEntry {
            name: name.to_owned(),
            data: Rc::new(Vec::new()),
            listed_size: 0,
            is_dir: true,
        });
        self
    }

    /// Insert or replace a file in place.
    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.entries.retain(|e| e.name != name);
        let listed_size = data.len() as u64;
        self.entries.push(MemoryEntry {
            name: name.to_owned(),
            data: Rc::new(data),
            listed_size,
            is_dir: false,
        });
    }

    /// Make the directory scan report `size` for `name` regardless of content.
    pub fn set_listed_size(&mut self, name: &str, size: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.listed_size = size;
        }
    }

    /// Fail every `open_file` of `path`.
    pub fn fail_open(&mut self, path: &str) {
        self.fail_open = Some(path.to_owned());
    }

    /// Fail any `read` that starts at `offset`.
    pub fn fail_read_at(&mut self, offset: u64) {
        self.fail_read_at = Some(offset);
    }

    /// Fail the next directory scans (card removed).
    pub fn fail_scan(&mut self, fail: bool) {
        self.fail_scan = fail;
    }

    /// Snapshot of the call log.
    pub fn log(&self) -> StorageLog {
        self.log.borrow().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear_log(&self) {
        *self.log.borrow_mut() = StorageLog::default();
    }
}

/// Open handle into a [`MemoryStorage`] file.
#[derive(Debug)]
pub struct MemoryFile {
    data: Rc<Vec<u8>>,
    pos: u64,
    log: Rc<RefCell<StorageLog>>,
    fail_read_at: Option<u64>,
}

impl File for MemoryFile {
    type Error = MemoryStorageError;

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.fail_read_at == Some(self.pos) {
            return Err(MemoryStorageError::Injected);
        }
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX);
        let available = self.data.get(start..).unwrap_or(&[]);
        let n = buf.len().min(available.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), available.get(..n)) {
            dst.copy_from_slice(src);
        }
        self.log.borrow_mut().reads.push(ReadRecord {
            offset: self.pos,
            requested: buf.len(),
            returned: n,
        });
        self.pos = self.pos.saturating_add(n as u64);
        Ok(n)
    }

    async fn seek(&mut self, pos: u64) -> Result<u64, Self::Error> {
        self.log.borrow_mut().seeks.push(pos);
        self.pos = pos;
        Ok(pos)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn close(self) -> Result<(), Self::Error> {
        let mut log = self.log.borrow_mut();
        log.closes = log.closes.saturating_add(1);
        Ok(())
    }
}

/// Directory cursor over a snapshot of matching entries.
#[derive(Debug)]
pub struct MemoryDir {
    matches: std::vec::IntoIter<DirEntry>,
}

impl Storage for MemoryStorage {
    type Error = MemoryStorageError;
    type File = MemoryFile;
    type Dir = MemoryDir;

    async fn open_file(&mut self, path: &str) -> Result<Self::File, Self::Error> {
        self.log.borrow_mut().opens.push(path.to_owned());
        if self.fail_open.as_deref() == Some(path) {
            return Err(MemoryStorageError::Injected);
        }
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == path && !e.is_dir)
            .ok_or(MemoryStorageError::NotFound)?;
        Ok(MemoryFile {
            data: Rc::clone(&entry.data),
            pos: 0,
            log: Rc::clone(&self.log),
            fail_read_at: self.fail_read_at,
        })
    }

    async fn find_first(&mut self, pattern: &str) -> Result<Self::Dir, Self::Error> {
        {
            let mut log = self.log.borrow_mut();
            log.scans = log.scans.saturating_add(1);
        }
        if self.fail_scan {
            return Err(MemoryStorageError::Injected);
        }
        let matches: Vec<DirEntry> = self
            .entries
            .iter()
            .filter(|e| matches_pattern(pattern, &e.name))
            .filter_map(|e| {
                Some(DirEntry {
                    name: String::try_from(e.name.as_str()).ok()?,
                    size: e.listed_size,
                    is_dir: e.is_dir,
                })
            })
            .collect();
        Ok(MemoryDir { matches: matches.into_iter() })
    }

    async fn find_next(&mut self, dir: &mut Self::Dir) -> Result<Option<DirEntry>, Self::Error> {
        Ok(dir.matches.next())
    }
}
