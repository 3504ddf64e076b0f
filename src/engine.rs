//! The database façade.
//!
//! Ties the memtable, level manager, and block cache together into the
//! public `set`/`get`/`delete`/`flush`/`compact`/`close` surface. Write
//! path: the active memtable absorbs writes until it crosses
//! `memtable_threshold_bytes`, at which point `flush` swaps in a fresh
//! memtable + WAL and publishes the drained one as a new L0 table.
//! Compaction runs on a dedicated background thread, woken by a
//! `crossbeam` channel after every flush rather than polled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::cache::{BlockCache, CacheStats};
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::level::LevelManager;
use crate::memtable::Memtable;
use crate::wal::Wal;

enum WorkerMsg {
    CompactionHint,
    Shutdown,
}

/// An embedded, disk-backed ordered key-value store.
pub struct Database {
    dir: PathBuf,
    config: Config,
    active: RwLock<Arc<Memtable>>,
    flushing: Mutex<Option<Arc<Memtable>>>,
    levels: Arc<LevelManager>,
    cache: Arc<BlockCache>,
    next_wal_id: AtomicU64,
    flush_lock: Mutex<()>,
    closed: AtomicBool,
    worker_tx: crossbeam::channel::Sender<WorkerMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Opens (and, if necessary, creates) a store rooted at `dir`,
    /// recovering any WAL and SSTable state left behind by a prior,
    /// possibly unclean, shutdown.
    pub fn open(dir: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let cache = Arc::new(BlockCache::new(config.block_cache_bytes));
        let levels_dir = dir.join("levels");
        let levels = Arc::new(LevelManager::recover(&levels_dir, config.clone(), cache.clone())?);

        let mut next_wal_id = 0u64;
        for path in wal_files(&dir)? {
            if let Some(id) = id_from_path(&path) {
                next_wal_id = next_wal_id.max(id + 1);
            }
        }
        let active = Arc::new(recover_active_memtable(&dir, &mut next_wal_id)?);

        let (worker_tx, worker_rx) = crossbeam::channel::bounded(4);
        let worker_levels = levels.clone();
        let worker = std::thread::Builder::new()
            .name("stratumdb-compaction".into())
            .spawn(move || compaction_worker(worker_levels, worker_rx))
            .map_err(Error::Io)?;

        info!(dir = %dir.display(), "database opened");

        Ok(Database {
            dir,
            config,
            active: RwLock::new(active),
            flushing: Mutex::new(None),
            levels,
            cache,
            next_wal_id: AtomicU64::new(next_wal_id),
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            worker_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn set(&self, key: impl Into<String>, value: Vec<u8>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::bad_input("key must not be empty"));
        }
        self.write_entry(Entry::put(key, value))
    }

    pub fn delete(&self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::bad_input("key must not be empty"));
        }
        self.write_entry(Entry::delete(key))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::bad_input("key must not be empty"));
        }

        if let Some(entry) = self.active.read().expect("active lock poisoned").get(key) {
            return Ok(resolve(entry));
        }
        if let Some(flushing) = self.flushing.lock().expect("flushing lock poisoned").as_ref() {
            if let Some(entry) = flushing.get(key) {
                return Ok(resolve(entry));
            }
        }
        if let Some(entry) = self.levels.get(key)? {
            return Ok(resolve(entry));
        }
        Ok(None)
    }

    /// Swaps in a fresh memtable and publishes the drained one as a new
    /// L0 table. A no-op if the active memtable is empty. Signals the
    /// background compaction worker afterwards; does not wait for
    /// compaction to run.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush_inner()
    }

    fn flush_inner(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().expect("flush lock poisoned");

        // A prior call may have drained a memtable and then failed to
        // publish it as an L0 table. Retry against that same memtable
        // instead of swapping in a new one, so the drained data is
        // never silently dropped from the read path.
        let pending = self.flushing.lock().expect("flushing lock poisoned").clone();
        let old_active = match pending {
            Some(pending) => pending,
            None => {
                let mut active = self.active.write().expect("active lock poisoned");
                if active.is_empty() {
                    return Ok(());
                }
                let new_id = self.next_wal_id.fetch_add(1, AtomicOrdering::SeqCst);
                let new_memtable = Arc::new(Memtable::new(self.wal_path(new_id))?);
                let drained = std::mem::replace(&mut *active, new_memtable);
                drop(active);
                drained.make_read_only();
                *self.flushing.lock().expect("flushing lock poisoned") = Some(drained.clone());
                drained
            }
        };

        let entries = old_active.drain();
        self.levels.add_l0_table(entries)?;

        *self.flushing.lock().expect("flushing lock poisoned") = None;
        old_active.delete_wal()?;

        debug!("memtable flushed");
        let _ = self.worker_tx.try_send(WorkerMsg::CompactionHint);
        Ok(())
    }

    /// Runs compaction synchronously on the calling thread until no
    /// level is over its target. Mostly useful in tests; production
    /// callers can rely on the background worker instead.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        run_compaction_pass(&self.levels)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of tables currently in L0.
    pub fn l0_table_count(&self) -> usize {
        self.levels.l0_table_count()
    }

    /// Total number of real (non-cached) SSTable block decodes across
    /// every level since the store was opened. A diagnostic for
    /// measuring bloom-filter read amplification, not used by any
    /// correctness path.
    pub fn total_block_decodes(&self) -> u64 {
        self.levels.total_block_decodes()
    }

    /// `(min_key, max_key)` of every table at `level`. Used to assert
    /// the disjoint-range invariant on L1 and deeper.
    pub fn level_key_ranges(&self, level: usize) -> Vec<(String, String)> {
        self.levels.level_key_ranges(level)
    }

    /// Flushes any remaining writes and stops the background worker.
    /// Idempotent; safe to call more than once.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let result = self.flush_inner();
        let _ = self.worker_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.lock().expect("worker lock poisoned").take() {
            if handle.join().is_err() {
                error!("compaction worker thread panicked");
            }
        }
        result
    }

    fn write_entry(&self, entry: Entry) -> Result<()> {
        self.ensure_open()?;
        loop {
            let active = self.active.read().expect("active lock poisoned").clone();
            match active.set(entry.clone()) {
                Ok(()) => break,
                Err(crate::memtable::MemtableError::ReadOnly) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if self.active.read().expect("active lock poisoned").accounted_size()
            >= self.config.memtable_threshold_bytes
        {
            self.flush()?;
        }
        Ok(())
    }

    fn wal_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("wal_{id}.wal"))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error while closing database on drop");
        }
    }
}

fn resolve(entry: Entry) -> Option<Vec<u8>> {
    if entry.tombstone {
        None
    } else {
        Some(entry.value)
    }
}

fn compaction_worker(levels: Arc<LevelManager>, rx: crossbeam::channel::Receiver<WorkerMsg>) {
    for msg in rx.iter() {
        match msg {
            WorkerMsg::CompactionHint => {
                if let Err(e) = run_compaction_pass(&levels) {
                    warn!(error = %e, "background compaction pass failed");
                }
            }
            WorkerMsg::Shutdown => break,
        }
    }
}

fn run_compaction_pass(levels: &LevelManager) -> Result<()> {
    while levels.needs_l0_compaction() {
        levels.compact_l0()?;
    }
    while let Some(level) = levels.level_needing_compaction() {
        levels.compact_level(level)?;
    }
    Ok(())
}

fn wal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("wal") {
            out.push(path);
        }
    }
    out.sort_by_key(|p| id_from_path(p).unwrap_or(0));
    Ok(out)
}

fn id_from_path(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.strip_prefix("wal_")?.parse().ok()
}

/// Merges every on-disk WAL (oldest first, so later files correctly
/// overwrite earlier ones) into one fresh memtable backed by a brand
/// new WAL, then removes the old files. Keeps the "one WAL per active
/// memtable" invariant intact across a crash that happened mid-flush,
/// when both the old (flushing) and new (active) WAL briefly coexist.
fn recover_active_memtable(dir: &Path, next_wal_id: &mut u64) -> Result<Memtable> {
    let old_paths = wal_files(dir)?;

    let id = *next_wal_id;
    *next_wal_id += 1;
    let memtable = Memtable::new(dir.join(format!("wal_{id}.wal")))?;

    for old_path in &old_paths {
        let wal = Wal::open(old_path)?;
        for entry in wal.read()? {
            memtable.set(entry)?;
        }
    }
    for old_path in old_paths {
        std::fs::remove_file(&old_path)?;
    }
    Ok(memtable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_then_get() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), Config::default()).unwrap();
        db.set("a", b"1".to_vec()).unwrap();
        assert_eq!(db.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get("missing").unwrap(), None);
    }

    #[test]
    fn delete_then_get_is_none() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), Config::default()).unwrap();
        db.set("a", b"1".to_vec()).unwrap();
        db.delete("a").unwrap();
        assert_eq!(db.get("a").unwrap(), None);
    }

    #[test]
    fn tombstone_survives_across_flush() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), Config::default()).unwrap();
        db.set("a", b"1".to_vec()).unwrap();
        db.flush().unwrap();
        db.delete("a").unwrap();
        db.flush().unwrap();
        assert_eq!(db.get("a").unwrap(), None);
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), Config::default()).unwrap();
        assert!(db.set("", vec![]).is_err());
        assert!(db.get("").is_err());
    }

    #[test]
    fn automatic_flush_on_threshold() {
        let dir = tempdir().unwrap();
        let config = Config::default()
            .with_memtable_threshold_bytes(256)
            .with_l0_compaction_trigger(1000);
        let db = Database::open(dir.path(), config).unwrap();
        for i in 0..50 {
            db.set(format!("k{i:04}"), vec![0u8; 32]).unwrap();
        }
        assert!(db.levels.l0_table_count() >= 1);
        for i in 0..50 {
            assert_eq!(db.get(&format!("k{i:04}")).unwrap(), Some(vec![0u8; 32]));
        }
    }

    #[test]
    fn operations_after_close_are_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), Config::default()).unwrap();
        db.set("a", vec![1]).unwrap();
        db.close().unwrap();
        assert!(matches!(db.set("b", vec![2]), Err(Error::Closed)));
        assert!(matches!(db.get("a"), Err(Error::Closed)));
        // idempotent
        assert!(db.close().is_ok());
    }

    #[test]
    fn recovers_after_reopen_without_close() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(dir.path(), Config::default()).unwrap();
            for i in 0..200 {
                db.set(format!("k{i:05}"), i.to_string().into_bytes()).unwrap();
            }
            std::mem::forget(db); // simulate a crash: skip Drop's flush/close
        }
        let db = Database::open(dir.path(), Config::default()).unwrap();
        for i in 0..200 {
            assert_eq!(db.get(&format!("k{i:05}")).unwrap(), Some(i.to_string().into_bytes()));
        }
    }

    #[test]
    fn explicit_compact_merges_l0_tables() {
        let dir = tempdir().unwrap();
        let config = Config::default().with_l0_compaction_trigger(100);
        let db = Database::open(dir.path(), config).unwrap();
        for batch in 0..3 {
            for i in 0..5 {
                db.set(format!("b{batch}-{i}"), vec![0u8; 8]).unwrap();
            }
            db.flush().unwrap();
        }
        assert_eq!(db.levels.l0_table_count(), 3);
        db.compact().unwrap();
        assert_eq!(db.levels.l0_table_count(), 0);
        assert_eq!(db.get("b0-0").unwrap(), Some(vec![0u8; 8]));
        assert_eq!(db.get("b2-4").unwrap(), Some(vec![0u8; 8]));
    }
}
