//! Append store: one backing file plus an in-memory offset/length index.
//!
//! The store is a byte-level append log with random read access. Each
//! `write` appends at the current end of the file and records an
//! [`IndexEntry`]; `read` seeks to the recorded offset and reads exactly the
//! recorded length. `delete` only drops the index slot: the bytes stay in the
//! file until the store is closed, at which point the whole file is removed.
//!
//! # Lifecycle
//!
//! - The backing file is created lazily on the first write, under the
//!   store's directory, with a random name.
//! - `close` releases the handle and deletes the file. It is idempotent.
//!   Dropping the store closes it.
//! - Any use after close fails with [`Error::Closed`].
//!
//! # Concurrency
//!
//! Single writer, single reader at a time. The file handle sits behind a
//! mutex only so that cursors ([`StoreSnapshot`]) can share it; the store
//! performs no coordination between writers.

use harvest_core::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Byte range of one stored element inside the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset of the first byte
    pub offset: u64,
    /// Number of bytes
    pub length: u64,
}

/// Shared handle to the backing file.
#[derive(Debug)]
pub(crate) struct BackingFile {
    file: Mutex<File>,
    path: PathBuf,
    closed: AtomicBool,
}

impl BackingFile {
    fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("spill-{}.dat", Uuid::new_v4()));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        debug!(target: "harvest::store", path = %path.display(), "Created backing file");
        Ok(Self {
            file: Mutex::new(file),
            path,
            closed: AtomicBool::new(false),
        })
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    pub(crate) fn read_at(&self, entry: IndexEntry) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut buf = vec![0u8; entry.length as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(entry.offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn release(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Append-only byte store over a single spill file.
#[derive(Debug)]
pub struct AppendStore {
    dir: PathBuf,
    backing: Option<Arc<BackingFile>>,
    index: Vec<IndexEntry>,
    end_offset: u64,
    reserve: u64,
    closed: bool,
}

impl AppendStore {
    /// Create a store that will spill into `dir`.
    ///
    /// Nothing touches the filesystem until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            backing: None,
            index: Vec::new(),
            end_offset: 0,
            reserve: 0,
            closed: false,
        }
    }

    /// Create a store spilling into the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Keep at least `bytes` free on the spill filesystem.
    ///
    /// A write fails with [`Error::StorageExhausted`] when free space minus
    /// the reserve is smaller than the write.
    pub fn with_reserve(mut self, bytes: u64) -> Self {
        self.reserve = bytes;
        self
    }

    /// Append `bytes`, returning the index position of the new entry.
    ///
    /// Free space is checked before the write. The check is advisory: another
    /// process may consume the space between check and write.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        let backing = match &self.backing {
            Some(b) => Arc::clone(b),
            None => {
                let b = Arc::new(BackingFile::create(&self.dir)?);
                self.backing = Some(Arc::clone(&b));
                b
            }
        };

        let needed = bytes.len() as u64;
        let available = fs2::available_space(&backing.path)?;
        if available.saturating_sub(self.reserve) < needed {
            warn!(
                target: "harvest::store",
                needed,
                available,
                reserve = self.reserve,
                "Spill filesystem out of space"
            );
            return Err(Error::StorageExhausted { needed, available });
        }

        let offset = self.end_offset;
        backing.write_at(offset, bytes)?;
        self.end_offset += needed;
        self.index.push(IndexEntry {
            offset,
            length: needed,
        });
        Ok(self.index.len() - 1)
    }

    /// Read the bytes of entry `id`
    pub fn read(&self, id: usize) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::Closed);
        }
        let entry = *self.index.get(id).ok_or(Error::NotFound(id))?;
        let backing = self.backing.as_ref().ok_or(Error::NotFound(id))?;
        backing.read_at(entry)
    }

    /// Remove entry `id` from the index.
    ///
    /// Later entries shift down by one. The file is not compacted.
    pub fn delete(&mut self, id: usize) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if id >= self.index.len() {
            return Err(Error::NotFound(id));
        }
        self.index.remove(id);
        Ok(())
    }

    /// Release the file handle and delete the backing file.
    ///
    /// Safe to call more than once. Open snapshots fail with
    /// [`Error::Closed`] afterwards.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let entries = self.index.len();
        self.index.clear();
        if let Some(backing) = self.backing.take() {
            backing.release()?;
            debug!(
                target: "harvest::store",
                path = %backing.path.display(),
                entries,
                bytes = self.end_offset,
                "Closed backing file"
            );
        }
        Ok(())
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when there are no live entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes appended so far, including those of deleted entries
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Index entry of `id`
    pub fn entry(&self, id: usize) -> Option<IndexEntry> {
        self.index.get(id).copied()
    }

    /// Path of the backing file, once created
    pub fn path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|b| b.path.as_path())
    }

    /// Read-only view of the current index over the same backing file.
    ///
    /// The snapshot copies the index, not the data. Entries appended or
    /// deleted afterwards are invisible to it.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(StoreSnapshot {
            backing: self.backing.clone(),
            index: self.index.clone(),
        })
    }
}

impl Drop for AppendStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "harvest::store", error = %e, "Failed to remove backing file on drop");
        }
    }
}

/// Frozen index plus a shared read handle to a store's backing file.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    backing: Option<Arc<BackingFile>>,
    index: Vec<IndexEntry>,
}

impl StoreSnapshot {
    /// Read entry `id` as it was when the snapshot was taken
    pub fn read(&self, id: usize) -> Result<Vec<u8>> {
        let entry = *self.index.get(id).ok_or(Error::NotFound(id))?;
        let backing = self.backing.as_ref().ok_or(Error::NotFound(id))?;
        backing.read_at(entry)
    }

    /// Number of entries in the snapshot
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the snapshot holds no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> AppendStore {
        AppendStore::new(dir.path())
    }

    #[test]
    fn test_file_created_lazily() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(store.path().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        store.write(b"first").unwrap();
        let path = store.path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(dir.path()));
    }

    #[test]
    fn test_write_read() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let a = store.write(b"alpha").unwrap();
        let b = store.write(b"").unwrap();
        let c = store.write(b"gamma").unwrap();

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(store.read(a).unwrap(), b"alpha");
        assert_eq!(store.read(b).unwrap(), b"");
        assert_eq!(store.read(c).unwrap(), b"gamma");
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.write(&[1; 10]).unwrap();
        store.write(&[2; 3]).unwrap();

        assert_eq!(
            store.entry(0),
            Some(IndexEntry {
                offset: 0,
                length: 10
            })
        );
        assert_eq!(
            store.entry(1),
            Some(IndexEntry {
                offset: 10,
                length: 3
            })
        );
        assert_eq!(store.end_offset(), 13);
    }

    #[test]
    fn test_delete_shifts_index_but_keeps_bytes() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.write(b"a").unwrap();
        store.write(b"b").unwrap();
        store.write(b"c").unwrap();

        store.delete(1).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.read(1).unwrap(), b"c");
        assert_eq!(store.end_offset(), 3);

        // Appending after a delete never reuses freed bytes
        store.write(b"d").unwrap();
        assert_eq!(store.entry(2).unwrap().offset, 3);
    }

    #[test]
    fn test_read_missing_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(matches!(store.read(0), Err(Error::NotFound(0))));

        store.write(b"x").unwrap();
        store.delete(0).unwrap();
        assert!(matches!(store.read(0), Err(Error::NotFound(0))));
        assert!(matches!(store.delete(5), Err(Error::NotFound(5))));
    }

    #[test]
    fn test_close_is_idempotent_and_removes_file() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.write(b"payload").unwrap();
        let path = store.path().unwrap().to_path_buf();

        store.close().unwrap();
        store.close().unwrap();

        assert!(!path.exists());
        assert!(store.is_closed());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_close_without_writes() {
        let mut store = AppendStore::in_temp_dir();
        store.close().unwrap();
        assert!(store.is_closed());
    }

    #[test]
    fn test_use_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.write(b"x").unwrap();
        store.close().unwrap();

        assert!(matches!(store.write(b"y"), Err(Error::Closed)));
        assert!(matches!(store.read(0), Err(Error::Closed)));
        assert!(matches!(store.delete(0), Err(Error::Closed)));
        assert!(matches!(store.snapshot(), Err(Error::Closed)));
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = {
            let mut store = store_in(&dir);
            store.write(b"x").unwrap();
            store.path().unwrap().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_reserve_exhausts_storage() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir).with_reserve(u64::MAX);

        let err = store.write(b"too big").unwrap_err();
        assert!(matches!(err, Error::StorageExhausted { needed: 7, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.write(b"one").unwrap();
        store.write(b"two").unwrap();

        let snapshot = store.snapshot().unwrap();
        store.delete(0).unwrap();
        store.write(b"three").unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.read(0).unwrap(), b"one");
        assert_eq!(snapshot.read(1).unwrap(), b"two");
    }

    #[test]
    fn test_snapshot_fails_after_close() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.write(b"one").unwrap();
        let snapshot = store.snapshot().unwrap();

        store.close().unwrap();
        assert!(matches!(snapshot.read(0), Err(Error::Closed)));
    }
}
