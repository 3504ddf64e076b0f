//! Bounded block cache.
//!
//! Keyed by `(file path, block offset)`, holding decoded (post-codec)
//! blocks. Eviction is LRU by byte budget, not entry count — a cache
//! sized for 64 MiB of 4 KiB blocks should not also accept one 60 MiB
//! block and starve everything else.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use lru::LruCache;

use crate::entry::Entry;

/// Per-entry bookkeeping overhead charged against the byte budget, on
/// top of each decoded entry's own `estimated_size`. Keeps a cache of
/// all-empty-value keys from reporting zero footprint.
const ENTRY_OVERHEAD_BYTES: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    file_id: u64,
    block_offset: u64,
}

impl CacheKey {
    fn new(path: &Path, offset: u64) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        CacheKey {
            file_id: hasher.finish(),
            block_offset: offset,
        }
    }
}

struct CachedBlock {
    entries: std::sync::Arc<Vec<Entry>>,
    size: u64,
}

/// Snapshot of cache activity, for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: u64,
    pub max_size: u64,
}

/// A process-wide LRU cache of decoded SSTable data blocks.
pub struct BlockCache {
    inner: Mutex<LruCache<CacheKey, CachedBlock>>,
    max_size: u64,
    size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    pub fn new(max_size_bytes: u64) -> Self {
        // An unbounded capacity cap keyed only on entry count; real
        // eviction is driven by `size` against `max_size_bytes` in
        // `put`, since blocks vary widely in size.
        let cap = NonZeroUsize::new(usize::MAX).unwrap();
        BlockCache {
            inner: Mutex::new(LruCache::new(cap)),
            max_size: max_size_bytes,
            size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, path: &Path, offset: u64) -> Option<std::sync::Arc<Vec<Entry>>> {
        let key = CacheKey::new(path, offset);
        let mut cache = self.inner.lock().expect("block cache lock poisoned");
        if let Some(block) = cache.get(&key) {
            self.hits.fetch_add(1, AtomicOrdering::Relaxed);
            Some(block.entries.clone())
        } else {
            self.misses.fetch_add(1, AtomicOrdering::Relaxed);
            None
        }
    }

    pub fn put(&self, path: &Path, offset: u64, entries: std::sync::Arc<Vec<Entry>>) {
        if self.max_size == 0 {
            return;
        }
        let size = entries
            .iter()
            .map(|e| e.estimated_size() as u64 + ENTRY_OVERHEAD_BYTES)
            .sum::<u64>()
            .max(ENTRY_OVERHEAD_BYTES);
        if size > self.max_size {
            return;
        }

        let key = CacheKey::new(path, offset);
        let mut cache = self.inner.lock().expect("block cache lock poisoned");

        if let Some(old) = cache.peek(&key) {
            self.size.fetch_sub(old.size, AtomicOrdering::Relaxed);
        }

        while self.size.load(AtomicOrdering::Relaxed) + size > self.max_size {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    self.size.fetch_sub(evicted.size, AtomicOrdering::Relaxed);
                    self.evictions.fetch_add(1, AtomicOrdering::Relaxed);
                }
                None => break,
            }
        }

        cache.put(key, CachedBlock { entries, size });
        self.size.fetch_add(size, AtomicOrdering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(AtomicOrdering::Relaxed),
            misses: self.misses.load(AtomicOrdering::Relaxed),
            evictions: self.evictions.load(AtomicOrdering::Relaxed),
            size: self.size.load(AtomicOrdering::Relaxed),
            max_size: self.max_size,
        }
    }

    pub fn clear(&self) {
        let mut cache = self.inner.lock().expect("block cache lock poisoned");
        cache.clear();
        self.size.store(0, AtomicOrdering::Relaxed);
    }
}
