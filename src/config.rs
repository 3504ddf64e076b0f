//! Tunable engine parameters, all with concrete defaults.

use crate::codec::Codec;

/// Configuration for one [`crate::Database::open`] call. Every field
/// can be overridden independently via the builder methods.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memtable size, in accounted bytes, that triggers a flush.
    pub memtable_threshold_bytes: u64,
    /// Target size of one SSTable data block before compression.
    pub data_block_size_bytes: usize,
    /// Target false-positive rate for each table's bloom filter.
    pub bloom_fpr: f64,
    /// Block compression codec applied to newly built SSTables.
    pub compression: Codec,
    /// Aggregate byte budget for the decoded-block cache.
    pub block_cache_bytes: u64,
    /// Maximum number of levels (L0..=max_levels-1).
    pub max_levels: usize,
    /// Number of L0 tables that triggers an L0 -> L1 compaction.
    pub l0_compaction_trigger: usize,
    /// Target size ratio between adjacent levels (L(i+1) / Li).
    pub level_ratio: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memtable_threshold_bytes: 1024 * 1024,
            data_block_size_bytes: 4096,
            bloom_fpr: 0.01,
            compression: Codec::default(),
            block_cache_bytes: 64 * 1024 * 1024,
            max_levels: 7,
            l0_compaction_trigger: 4,
            level_ratio: 10,
        }
    }
}

impl Config {
    pub fn with_memtable_threshold_bytes(mut self, n: u64) -> Self {
        self.memtable_threshold_bytes = n;
        self
    }

    pub fn with_data_block_size_bytes(mut self, n: usize) -> Self {
        self.data_block_size_bytes = n;
        self
    }

    pub fn with_bloom_fpr(mut self, p: f64) -> Self {
        self.bloom_fpr = p;
        self
    }

    pub fn with_compression(mut self, codec: Codec) -> Self {
        self.compression = codec;
        self
    }

    pub fn with_block_cache_bytes(mut self, n: u64) -> Self {
        self.block_cache_bytes = n;
        self
    }

    pub fn with_max_levels(mut self, n: usize) -> Self {
        self.max_levels = n;
        self
    }

    pub fn with_l0_compaction_trigger(mut self, n: usize) -> Self {
        self.l0_compaction_trigger = n;
        self
    }

    pub fn with_level_ratio(mut self, n: u64) -> Self {
        self.level_ratio = n;
        self
    }
}
