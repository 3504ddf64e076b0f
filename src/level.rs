//! Level manager: leveled compaction over on-disk SSTables.
//!
//! L0 tables may have overlapping key ranges (they come straight from
//! memtable flushes); L1 and below are kept disjoint by construction —
//! every compaction that produces a table for level `i >= 1` merges
//! away any overlap before writing. `L0 -> L1` compaction folds every
//! L0 table plus whichever L1 tables it overlaps into one merged
//! output; `Li -> Li+1` compaction (`i >= 1`) takes the table with the
//! smallest `min_key` in `Li` (round-robin by key order rather than by
//! age) plus its overlapping `Li+1` tables.
//!
//! Tombstones are dropped only when the compaction's output level is
//! the deepest level the store is configured to use — a shallower
//! level can never prove an older value doesn't exist further down.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::cache::BlockCache;
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::merge::{merge_streams, TombstoneDisposition};
use crate::sstable::{now_unix, Sstable, SstableBuilder};

struct Level {
    tables: Vec<Arc<Sstable>>,
}

/// Owns every on-disk SSTable and runs compaction between levels.
pub struct LevelManager {
    dir: PathBuf,
    config: Config,
    levels: Mutex<Vec<Level>>,
    next_table_id: AtomicU64,
    cache: Arc<BlockCache>,
}

impl LevelManager {
    pub fn new(dir: impl Into<PathBuf>, config: Config) -> Self {
        Self::with_cache(dir, config, Arc::new(BlockCache::new(0)))
    }

    pub fn with_cache(dir: impl Into<PathBuf>, config: Config, cache: Arc<BlockCache>) -> Self {
        let max_levels = config.max_levels.max(1);
        LevelManager {
            dir: dir.into(),
            config,
            levels: Mutex::new((0..max_levels).map(|_| Level { tables: Vec::new() }).collect()),
            next_table_id: AtomicU64::new(0),
            cache,
        }
    }

    /// Recovers state from `*.sst` files already on disk. Files whose
    /// footer fails to validate are skipped and logged, not fatal.
    pub fn recover(dir: impl Into<PathBuf>, config: Config, cache: Arc<BlockCache>) -> Result<Self> {
        let manager = Self::with_cache(dir, config, cache);
        let read_dir = match std::fs::read_dir(&manager.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&manager.dir)?;
                return Ok(manager);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut max_id = 0u64;
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sst") {
                continue;
            }
            if let Some(id) = table_id_from_path(&path) {
                max_id = max_id.max(id);
            }
            match Sstable::open_with_cache(&path, manager.config.compression, Some(manager.cache.clone())) {
                Ok(table) => {
                    let level = table.level() as usize;
                    let mut levels = manager.levels.lock().expect("levels lock poisoned");
                    if level >= levels.len() {
                        warn!(path = %path.display(), level, "table level exceeds max_levels, skipping");
                        continue;
                    }
                    levels[level].tables.push(Arc::new(table));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable SSTable during recovery");
                }
            }
        }

        manager.next_table_id.store(max_id + 1, AtomicOrdering::SeqCst);
        let mut levels = manager.levels.lock().expect("levels lock poisoned");
        for (i, level) in levels.iter_mut().enumerate() {
            if i == 0 {
                level.tables.sort_by(|a, b| table_sort_key(a).cmp(&table_sort_key(b)));
            } else {
                level.tables.sort_by(|a, b| a.min_key().cmp(b.min_key()));
            }
        }
        drop(levels);
        Ok(manager)
    }

    /// Writes `entries` as a new L0 table.
    pub fn add_l0_table(&self, entries: Vec<Entry>) -> Result<()> {
        let id = self.next_table_id.fetch_add(1, AtomicOrdering::SeqCst);
        let path = self.table_path(0, id);
        let builder = SstableBuilder::new(
            self.config.data_block_size_bytes,
            self.config.compression,
            self.config.bloom_fpr,
            0,
        );
        builder.build(&path, entries)?;
        let table = Sstable::open_with_cache(&path, self.config.compression, Some(self.cache.clone()))?;

        let mut levels = self.levels.lock().expect("levels lock poisoned");
        levels[0].tables.push(Arc::new(table));
        debug!(path = %path.display(), l0_tables = levels[0].tables.len(), "L0 table published");
        Ok(())
    }

    /// Looks up `key` across every level, newest data first: L0 from
    /// most to least recently flushed, then L1..Ln by disjoint range.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        let levels = self.levels.lock().expect("levels lock poisoned");
        for table in levels[0].tables.iter().rev() {
            if let Some(entry) = table.get(key)? {
                return Ok(Some(entry));
            }
        }
        for level in levels.iter().skip(1) {
            if let Some(table) = level
                .tables
                .iter()
                .find(|t| key >= t.min_key() && key <= t.max_key())
            {
                if let Some(entry) = table.get(key)? {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    pub fn l0_table_count(&self) -> usize {
        self.levels.lock().expect("levels lock poisoned")[0].tables.len()
    }

    /// Sum of [`Sstable::block_decode_count`] across every table in
    /// every level. A diagnostic for measuring bloom-filter read
    /// amplification store-wide, not used by any correctness path.
    pub fn total_block_decodes(&self) -> u64 {
        self.levels
            .lock()
            .expect("levels lock poisoned")
            .iter()
            .flat_map(|level| level.tables.iter())
            .map(|t| t.block_decode_count())
            .sum()
    }

    /// Snapshot of the `(min_key, max_key)` range of every table at
    /// `level`, in whatever order the level currently holds them.
    /// Used by tests to assert the disjoint-range invariant on L1+.
    pub fn level_key_ranges(&self, level: usize) -> Vec<(String, String)> {
        let levels = self.levels.lock().expect("levels lock poisoned");
        match levels.get(level) {
            Some(l) => l
                .tables
                .iter()
                .map(|t| (t.min_key().to_string(), t.max_key().to_string()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn needs_l0_compaction(&self) -> bool {
        self.l0_table_count() >= self.config.l0_compaction_trigger
    }

    /// Returns the shallowest level `>= 1` currently over its table
    /// count target, if any.
    pub fn level_needing_compaction(&self) -> Option<usize> {
        let levels = self.levels.lock().expect("levels lock poisoned");
        for (i, level) in levels.iter().enumerate().skip(1) {
            if i + 1 >= levels.len() {
                break; // nothing deeper to cascade into
            }
            if level.tables.len() as u64 > self.level_target_tables(i) {
                return Some(i);
            }
        }
        None
    }

    /// `T0 * R^i`: the level-`i` table count above which compaction
    /// into `i+1` is triggered, `T0` being the L0 compaction trigger.
    fn level_target_tables(&self, level: usize) -> u64 {
        (self.config.l0_compaction_trigger as u64)
            .saturating_mul(self.config.level_ratio.saturating_pow(level as u32))
    }

    /// Merges every L0 table plus any overlapping L1 table into one
    /// new L1 table.
    pub fn compact_l0(&self) -> Result<()> {
        let (l0_tables, overlapping_l1, l1_len) = {
            let levels = self.levels.lock().expect("levels lock poisoned");
            if levels[0].tables.is_empty() {
                return Ok(());
            }
            let min_key = levels[0]
                .tables
                .iter()
                .map(|t| t.min_key().to_string())
                .min()
                .unwrap();
            let max_key = levels[0]
                .tables
                .iter()
                .map(|t| t.max_key().to_string())
                .max()
                .unwrap();
            let overlapping: Vec<Arc<Sstable>> = levels[1]
                .tables
                .iter()
                .filter(|t| ranges_overlap(t.min_key(), t.max_key(), &min_key, &max_key))
                .cloned()
                .collect();
            (levels[0].tables.clone(), overlapping, levels.len() > 2)
        };

        let disposition = if l1_len {
            TombstoneDisposition::Retain
        } else {
            TombstoneDisposition::DropAtBottom
        };
        self.merge_into(0, &l0_tables, 1, &overlapping_l1, disposition)?;
        Ok(())
    }

    /// Merges the `Li` table with the smallest `min_key` plus its
    /// overlapping `Li+1` tables into `Li+1`.
    pub fn compact_level(&self, level: usize) -> Result<()> {
        let (source, overlapping, is_bottom_target) = {
            let levels = self.levels.lock().expect("levels lock poisoned");
            if level == 0 || level + 1 >= levels.len() {
                return Ok(());
            }
            let Some(chosen) = levels[level]
                .tables
                .iter()
                .min_by(|a, b| a.min_key().cmp(b.min_key()))
                .cloned()
            else {
                return Ok(());
            };
            let overlapping: Vec<Arc<Sstable>> = levels[level + 1]
                .tables
                .iter()
                .filter(|t| ranges_overlap(t.min_key(), t.max_key(), chosen.min_key(), chosen.max_key()))
                .cloned()
                .collect();
            (chosen, overlapping, level + 2 >= levels.len())
        };

        let disposition = if is_bottom_target {
            TombstoneDisposition::DropAtBottom
        } else {
            TombstoneDisposition::Retain
        };
        self.merge_into(level, std::slice::from_ref(&source), level + 1, &overlapping, disposition)?;
        Ok(())
    }

    fn merge_into(
        &self,
        source_level: usize,
        source_tables: &[Arc<Sstable>],
        target_level: usize,
        target_tables: &[Arc<Sstable>],
        disposition: TombstoneDisposition,
    ) -> Result<()> {
        if source_tables.is_empty() {
            return Ok(());
        }

        let mut streams: Vec<std::vec::IntoIter<Entry>> = Vec::new();
        for table in target_tables {
            streams.push(table.scan()?.into_iter());
        }
        for table in source_tables {
            streams.push(table.scan()?.into_iter());
        }
        let merged: Vec<Entry> = merge_streams(streams, disposition).collect();

        let new_table = if merged.is_empty() {
            None
        } else {
            let id = self.next_table_id.fetch_add(1, AtomicOrdering::SeqCst);
            let path = self.table_path(target_level, id);
            let builder = SstableBuilder::new(
                self.config.data_block_size_bytes,
                self.config.compression,
                self.config.bloom_fpr,
                target_level as u32,
            );
            builder.build(&path, merged)?;
            Some(Arc::new(Sstable::open_with_cache(&path, self.config.compression, Some(self.cache.clone()))?))
        };

        let mut levels = self.levels.lock().expect("levels lock poisoned");
        let source_paths: Vec<PathBuf> = source_tables.iter().map(|t| t.path().to_path_buf()).collect();
        levels[source_level]
            .tables
            .retain(|t| !source_paths.contains(&t.path().to_path_buf()));

        let target_paths: Vec<PathBuf> = target_tables.iter().map(|t| t.path().to_path_buf()).collect();
        levels[target_level]
            .tables
            .retain(|t| !target_paths.contains(&t.path().to_path_buf()));

        if let Some(table) = new_table {
            levels[target_level].tables.push(table);
            levels[target_level]
                .tables
                .sort_by(|a, b| a.min_key().cmp(b.min_key()));
        }
        drop(levels);

        for path in source_paths.into_iter().chain(target_paths.into_iter()) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove compacted SSTable");
            }
        }
        info!(source_level, target_level, "compaction complete");
        Ok(())
    }

    fn table_path(&self, level: usize, id: u64) -> PathBuf {
        self.dir.join(format!("L{level}_{id}_{}.sst", now_unix()))
    }
}

fn table_sort_key(table: &Sstable) -> u64 {
    table_id_from_path(table.path()).unwrap_or(0)
}

/// Parses the `<index>` component out of an `L<level>_<index>_<ts>.sst`
/// file stem. The name is advisory only (level is read from the table's
/// own meta block); this is used solely to recover `next_table_id` and
/// to order freshly-recovered L0 tables by flush order.
fn table_id_from_path(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('_');
    parts.next()?; // "L<level>"
    parts.next()?.parse().ok()
}

fn ranges_overlap(a_min: &str, a_max: &str, b_min: &str, b_max: &str) -> bool {
    a_min <= b_max && b_min <= a_max
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(keys: &[&str], ts: i64) -> Vec<Entry> {
        keys.iter()
            .map(|k| Entry::new(k.to_string(), b"v".to_vec(), false, ts))
            .collect()
    }

    #[test]
    fn flush_then_get() {
        let dir = tempdir().unwrap();
        let manager = LevelManager::new(dir.path(), Config::default());
        manager.add_l0_table(entries(&["a", "b", "c"], 1)).unwrap();
        assert_eq!(manager.get("b").unwrap().unwrap().value, b"v");
        assert!(manager.get("z").unwrap().is_none());
    }

    #[test]
    fn newest_l0_table_wins_on_overlap() {
        let dir = tempdir().unwrap();
        let manager = LevelManager::new(dir.path(), Config::default());
        manager
            .add_l0_table(vec![Entry::new("a".into(), b"old".to_vec(), false, 1)])
            .unwrap();
        manager
            .add_l0_table(vec![Entry::new("a".into(), b"new".to_vec(), false, 2)])
            .unwrap();
        assert_eq!(manager.get("a").unwrap().unwrap().value, b"new");
    }

    #[test]
    fn l0_compaction_trigger_and_merge() {
        let dir = tempdir().unwrap();
        let config = Config::default().with_l0_compaction_trigger(2);
        let manager = LevelManager::new(dir.path(), config);
        manager.add_l0_table(entries(&["a"], 1)).unwrap();
        assert!(!manager.needs_l0_compaction());
        manager.add_l0_table(entries(&["b"], 2)).unwrap();
        assert!(manager.needs_l0_compaction());

        manager.compact_l0().unwrap();
        assert_eq!(manager.l0_table_count(), 0);
        assert_eq!(manager.get("a").unwrap().unwrap().key, "a");
        assert_eq!(manager.get("b").unwrap().unwrap().key, "b");
    }

    #[test]
    fn compaction_drops_tombstones_at_bottom_level() {
        let dir = tempdir().unwrap();
        let config = Config::default().with_max_levels(2);
        let manager = LevelManager::new(dir.path(), config);
        manager
            .add_l0_table(vec![Entry::new("a".into(), vec![], true, 1)])
            .unwrap();
        manager.compact_l0().unwrap();
        assert!(manager.get("a").unwrap().is_none());
    }

    #[test]
    fn recover_reopens_existing_tables() {
        let dir = tempdir().unwrap();
        {
            let manager = LevelManager::new(dir.path(), Config::default());
            manager.add_l0_table(entries(&["a", "b"], 1)).unwrap();
        }
        let recovered =
            LevelManager::recover(dir.path(), Config::default(), Arc::new(BlockCache::new(0)))
                .unwrap();
        assert_eq!(recovered.get("a").unwrap().unwrap().key, "a");
        assert_eq!(recovered.l0_table_count(), 1);
    }
}
