//! Spill-backed sequence: an ordered collection whose elements live on disk.
//!
//! [`SpillSequence`] layers element serialization (bincode) over an
//! [`AppendStore`]. Only the offset/length index is held in memory, so a
//! sequence of millions of rows costs sixteen bytes per row of RAM.
//!
//! ## Contract
//!
//! - Append/remove only. Positional insert, positional set, retain and live
//!   sub-range views fail with [`Error::Unsupported`].
//! - Removal is by dense index: `remove(i)` returns the element at `i` and
//!   every later element moves down one position. `remove_value` removes the
//!   first equal element under the same rule.
//! - `iter()` yields a [`SpillCursor`] over a frozen copy of the index that
//!   shares the backing file. Mutating the sequence while a cursor is alive is
//!   allowed and invisible to the cursor; closing the sequence makes the
//!   cursor fail with [`Error::Closed`].
//! - `close()`/`clear()` delete the backing file; any later call fails with
//!   [`Error::Closed`]. Dropping the sequence closes it.

use crate::append_store::{AppendStore, StoreSnapshot};
use harvest_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Borrow;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Ordered, disk-backed collection of serializable elements.
#[derive(Debug)]
pub struct SpillSequence<T> {
    store: AppendStore,
    _element: PhantomData<fn() -> T>,
}

impl<T> SpillSequence<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create an empty sequence spilling into `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_store(AppendStore::new(dir))
    }

    /// Create an empty sequence spilling into the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::with_store(AppendStore::in_temp_dir())
    }

    /// Wrap an existing store.
    ///
    /// The store must be empty or hold entries written by a sequence of the
    /// same element type.
    pub fn with_store(store: AppendStore) -> Self {
        Self {
            store,
            _element: PhantomData,
        }
    }

    /// Serialize and append an element, returning its position
    pub fn add(&mut self, element: &T) -> Result<usize> {
        let bytes = bincode::serialize(element)?;
        self.store.write(&bytes)
    }

    /// Append every element in order, returning how many were stored.
    ///
    /// An element that fails to serialize is logged and skipped; the rest of
    /// the batch still goes in. Storage failures (exhausted space, I/O,
    /// closed) abort the batch.
    pub fn add_all<I>(&mut self, elements: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut added = 0;
        for (i, element) in elements.into_iter().enumerate() {
            match self.add(element.borrow()) {
                Ok(_) => added += 1,
                Err(Error::SerializationError(msg)) => {
                    warn!(
                        target: "harvest::store",
                        batch_position = i,
                        error = %msg,
                        "Skipping element that failed to serialize"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    /// Deserialize the element at `index`
    pub fn get(&self, index: usize) -> Result<T> {
        let bytes = self.store.read(index)?;
        decode(index, &bytes)
    }

    /// Remove and return the element at `index`; later elements shift down
    pub fn remove(&mut self, index: usize) -> Result<T> {
        let value = self.get(index)?;
        self.store.delete(index)?;
        Ok(value)
    }

    /// Drop trailing elements until at most `len` remain
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        while self.store.len() > len {
            self.store.delete(self.store.len() - 1)?;
        }
        Ok(())
    }

    /// One-pass cursor over the elements present right now
    pub fn iter(&self) -> Result<SpillCursor<T>> {
        Ok(SpillCursor {
            snapshot: self.store.snapshot()?,
            position: 0,
            _element: PhantomData,
        })
    }

    /// Copy every element into memory
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter()?.collect()
    }

    /// Not supported: the sequence is append-only
    pub fn insert(&mut self, _index: usize, _element: T) -> Result<()> {
        Err(Error::Unsupported("insert at index"))
    }

    /// Not supported: stored elements are never rewritten
    pub fn set(&mut self, _index: usize, _element: T) -> Result<T> {
        Err(Error::Unsupported("set at index"))
    }

    /// Not supported: would require rewriting the index wholesale
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, _keep: F) -> Result<()> {
        Err(Error::Unsupported("retain"))
    }

    /// Not supported: no live views over a sub-range
    pub fn sub_range(&self, _from: usize, _to: usize) -> Result<SpillCursor<T>> {
        Err(Error::Unsupported("sub-range view"))
    }

    /// Delete the backing file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }

    /// Same as [`close`](Self::close): the sequence is unusable afterwards
    pub fn clear(&mut self) -> Result<()> {
        self.close()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when the sequence holds no elements
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether the sequence has been closed
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    /// Path of the backing file, once the first element has been added
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }
}

impl<T> SpillSequence<T>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    /// Linear scan for an equal element
    pub fn contains(&self, value: &T) -> Result<bool> {
        Ok(self.index_of(value)?.is_some())
    }

    /// Position of the first equal element
    pub fn index_of(&self, value: &T) -> Result<Option<usize>> {
        for (i, element) in self.iter()?.enumerate() {
            if element? == *value {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Position of the last equal element
    pub fn last_index_of(&self, value: &T) -> Result<Option<usize>> {
        for i in (0..self.len()).rev() {
            if self.get(i)? == *value {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Remove the first equal element. Returns whether one was found.
    pub fn remove_value(&mut self, value: &T) -> Result<bool> {
        match self.index_of(value)? {
            Some(i) => {
                self.store.delete(i)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether every one of `values` has an equal element
    pub fn contains_all<'v, I>(&self, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'v T>,
        T: 'v,
    {
        for value in values {
            if !self.contains(value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Remove the first equal element for each of `values`, in turn.
    ///
    /// A value listed twice removes two matches. Returns whether anything was
    /// removed.
    pub fn remove_all<'v, I>(&mut self, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'v T>,
        T: 'v,
    {
        let mut changed = false;
        for value in values {
            changed |= self.remove_value(value)?;
        }
        Ok(changed)
    }
}

fn decode<T: DeserializeOwned>(index: usize, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::Corrupt(format!("entry {} failed to decode: {}", index, e)))
}

/// Cursor over a frozen view of a [`SpillSequence`].
///
/// Holds a copy of the index and a shared read handle on the backing file;
/// never restarts. Call [`SpillSequence::iter`] again for another pass.
#[derive(Debug)]
pub struct SpillCursor<T> {
    snapshot: StoreSnapshot,
    position: usize,
    _element: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Iterator for SpillCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.snapshot.len() {
            return None;
        }
        let index = self.position;
        self.position += 1;
        Some(
            self.snapshot
                .read(index)
                .and_then(|bytes| decode(index, &bytes)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<T: DeserializeOwned> ExactSizeIterator for SpillCursor<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::Row;
    use tempfile::TempDir;

    fn row(id: &str) -> Row {
        [("id", id), ("name", "compound")].into_iter().collect()
    }

    fn sequence(dir: &TempDir) -> SpillSequence<Row> {
        SpillSequence::new(dir.path())
    }

    #[test]
    fn test_get_returns_what_add_stored() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        let mut original = row("1");
        original.insert_absent("melting point");

        let index = seq.add(&original).unwrap();

        assert_eq!(seq.get(index).unwrap(), original);
    }

    #[test]
    fn test_add_all_empty_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        let added = seq.add_all(Vec::<Row>::new()).unwrap();
        assert_eq!(added, 0);
        assert!(seq.path().is_none());
    }

    #[test]
    fn test_add_all_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        let rows: Vec<Row> = (0..5).map(|i| row(&i.to_string())).collect();

        assert_eq!(seq.add_all(&rows).unwrap(), 5);
        assert_eq!(seq.to_vec().unwrap(), rows);
    }

    #[test]
    fn test_remove_shifts_later_elements() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all((0..4).map(|i| row(&i.to_string()))).unwrap();

        let removed = seq.remove(1).unwrap();

        assert_eq!(removed, row("1"));
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get(1).unwrap(), row("2"));
        assert_eq!(seq.get(2).unwrap(), row("3"));
        assert!(matches!(seq.get(3), Err(Error::NotFound(3))));
    }

    #[test]
    fn test_remove_value_removes_first_match() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all([row("a"), row("b"), row("a")]).unwrap();

        assert!(seq.remove_value(&row("a")).unwrap());
        assert_eq!(seq.to_vec().unwrap(), vec![row("b"), row("a")]);
        assert!(!seq.remove_value(&row("zzz")).unwrap());
    }

    #[test]
    fn test_linear_searches() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all([row("a"), row("b"), row("a")]).unwrap();

        assert!(seq.contains(&row("b")).unwrap());
        assert!(!seq.contains(&row("c")).unwrap());
        assert_eq!(seq.index_of(&row("a")).unwrap(), Some(0));
        assert_eq!(seq.last_index_of(&row("a")).unwrap(), Some(2));
        assert_eq!(seq.index_of(&row("c")).unwrap(), None);
    }

    #[test]
    fn test_contains_all() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all([row("a"), row("b"), row("c")]).unwrap();

        assert!(seq.contains_all(&[row("a"), row("c")]).unwrap());
        assert!(seq.contains_all(&[]).unwrap());
        assert!(!seq.contains_all(&[row("a"), row("z")]).unwrap());
    }

    #[test]
    fn test_remove_all_takes_first_match_per_value() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all([row("a"), row("b"), row("a"), row("c"), row("a")])
            .unwrap();

        assert!(seq.remove_all(&[row("a"), row("c"), row("a")]).unwrap());
        assert_eq!(seq.to_vec().unwrap(), vec![row("b"), row("a")]);
        assert!(!seq.remove_all(&[row("z")]).unwrap());
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_truncate_drops_tail() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all((0..6).map(|i| row(&i.to_string()))).unwrap();

        seq.truncate(4).unwrap();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.get(3).unwrap(), row("3"));

        seq.truncate(10).unwrap();
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn test_unsupported_mutations_fail_fast() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add(&row("a")).unwrap();

        assert!(matches!(seq.insert(0, row("b")), Err(Error::Unsupported(_))));
        assert!(matches!(seq.set(0, row("b")), Err(Error::Unsupported(_))));
        assert!(matches!(seq.retain(|_| true), Err(Error::Unsupported(_))));
        assert!(matches!(seq.sub_range(0, 1), Err(Error::Unsupported(_))));
        assert_eq!(seq.to_vec().unwrap(), vec![row("a")]);
    }

    #[test]
    fn test_cursor_ignores_later_mutation() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all([row("a"), row("b")]).unwrap();

        let cursor = seq.iter().unwrap();
        seq.remove(0).unwrap();
        seq.add(&row("c")).unwrap();

        let seen: Vec<Row> = cursor.map(|r| r.unwrap()).collect();
        assert_eq!(seen, vec![row("a"), row("b")]);
    }

    #[test]
    fn test_cursor_is_exact_size() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add_all([row("a"), row("b"), row("c")]).unwrap();

        let mut cursor = seq.iter().unwrap();
        assert_eq!(cursor.len(), 3);
        cursor.next();
        assert_eq!(cursor.len(), 2);
    }

    #[test]
    fn test_corrupt_entry_reported() {
        let dir = TempDir::new().unwrap();
        let mut store = AppendStore::new(dir.path());
        store.write(&[0xFF; 3]).unwrap();
        let seq: SpillSequence<Row> = SpillSequence::with_store(store);

        assert!(matches!(seq.get(0), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_close_and_clear_remove_file() {
        let dir = TempDir::new().unwrap();
        let mut seq = sequence(&dir);
        seq.add(&row("a")).unwrap();
        let path = seq.path().unwrap().to_path_buf();

        seq.clear().unwrap();
        seq.close().unwrap();

        assert!(!path.exists());
        assert!(seq.is_closed());
        assert!(matches!(seq.get(0), Err(Error::Closed)));
        assert!(matches!(seq.add(&row("b")), Err(Error::Closed)));
        assert!(matches!(seq.iter(), Err(Error::Closed)));
    }
}
