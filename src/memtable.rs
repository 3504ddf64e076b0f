//! Memtable.
//!
//! Couples a [`Wal`] with a [`ConcurrentIndex`]. Writes are WAL-first —
//! durability gate before the in-memory index is touched. `make_read_only`
//! is idempotent and one-way; once frozen, a
//! memtable never accepts further writes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use thiserror::Error;
use tracing::{debug, trace};

use crate::entry::Entry;
use crate::index::ConcurrentIndex;
use crate::wal::{Wal, WalError};

#[derive(Debug, Error)]
pub enum MemtableError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("memtable is read-only")]
    ReadOnly,
}

/// In-memory write buffer for one WAL segment.
pub struct Memtable {
    index: ConcurrentIndex,
    wal: Wal,
    wal_path: PathBuf,
    read_only: AtomicBool,
}

impl Memtable {
    /// Creates a fresh memtable backed by a new WAL at `wal_path`.
    pub fn new<P: AsRef<Path>>(wal_path: P) -> Result<Self, MemtableError> {
        let wal_path = wal_path.as_ref().to_path_buf();
        let wal = Wal::open(&wal_path)?;
        Ok(Memtable {
            index: ConcurrentIndex::new(),
            wal,
            wal_path,
            read_only: AtomicBool::new(false),
        })
    }

    /// Opens an existing WAL and replays it into a fresh index. Used
    /// during crash recovery.
    pub fn recover<P: AsRef<Path>>(wal_path: P) -> Result<Self, MemtableError> {
        let memtable = Self::new(wal_path)?;
        for entry in memtable.wal.read()? {
            memtable.index.upsert(entry);
        }
        Ok(memtable)
    }

    /// Appends `entry` to the WAL, then upserts it into the index. The
    /// WAL write is the durability gate: any failure there surfaces
    /// before the index is mutated.
    pub fn set(&self, entry: Entry) -> Result<(), MemtableError> {
        if self.read_only.load(AtomicOrdering::SeqCst) {
            return Err(MemtableError::ReadOnly);
        }
        self.wal.write(std::slice::from_ref(&entry))?;
        self.index.upsert(entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.index.get(key)
    }

    /// Marks this memtable read-only. Idempotent; safe to call more
    /// than once.
    pub fn make_read_only(&self) {
        if !self.read_only.swap(true, AtomicOrdering::SeqCst) {
            debug!(wal = %self.wal_path.display(), "memtable frozen");
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(AtomicOrdering::SeqCst)
    }

    pub fn len(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn accounted_size(&self) -> u64 {
        self.index.accounted_size()
    }

    /// Drains the memtable's contents in key order, for flushing into
    /// an SSTable. Does not mutate or clear the in-memory state.
    pub fn drain(&self) -> Vec<Entry> {
        trace!(len = self.len(), "draining memtable for flush");
        self.index.scan()
    }

    /// Deletes the backing WAL. Must only be called by the façade after
    /// the corresponding SSTable has been durably published.
    pub fn delete_wal(&self) -> Result<(), MemtableError> {
        self.wal.delete()?;
        Ok(())
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_then_get() {
        let dir = tempdir().unwrap();
        let mt = Memtable::new(dir.path().join("wal_1.wal")).unwrap();
        mt.set(Entry::put("a".into(), b"1".to_vec())).unwrap();
        assert_eq!(mt.get("a").unwrap().value, b"1");
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let mt = Memtable::new(dir.path().join("wal_1.wal")).unwrap();
        mt.make_read_only();
        let result = mt.set(Entry::put("a".into(), vec![]));
        assert!(matches!(result, Err(MemtableError::ReadOnly)));
    }

    #[test]
    fn make_read_only_is_idempotent() {
        let dir = tempdir().unwrap();
        let mt = Memtable::new(dir.path().join("wal_1.wal")).unwrap();
        mt.make_read_only();
        mt.make_read_only();
        assert!(mt.is_read_only());
    }

    #[test]
    fn recover_replays_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal_1.wal");
        {
            let mt = Memtable::new(&path).unwrap();
            mt.set(Entry::put("a".into(), b"1".to_vec())).unwrap();
            mt.set(Entry::put("b".into(), b"2".to_vec())).unwrap();
        }
        let recovered = Memtable::recover(&path).unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.get("a").unwrap().value, b"1");
    }

    #[test]
    fn drain_does_not_clear_state() {
        let dir = tempdir().unwrap();
        let mt = Memtable::new(dir.path().join("wal_1.wal")).unwrap();
        mt.set(Entry::put("a".into(), vec![])).unwrap();
        let drained = mt.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(mt.len(), 1);
    }
}
