//! SSTable: immutable, sorted, on-disk table.
//!
//! File layout, back to front:
//!
//! ```text
//! [data block 0][data block 1]...[data block n-1][meta block][index block][footer]
//! ```
//!
//! `Sstable::open` mmaps the file and validates the 40-byte footer.
//! `search` binary-searches the index for the data block that could
//! hold `key`, decompresses and decodes only that one block, and
//! performs a secondary-candidate probe: if `key` did not fall inside
//! any block's inclusive `[start_key, end_key]` range, the
//! first block with `start_key > key` is also checked — a key can sort
//! before every block's `start_key` has advanced past it while still
//! living in the previous block's tail due to how ranges are derived
//! from first/last keys actually written, not interpolated gaps.

mod block;
mod builder;

pub use builder::{now_unix, SstableBuilder};

use std::fs::File;
use std::path::{Path, PathBuf};

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;
use tracing::trace;

use crate::bloom::BloomFilter;
use crate::cache::BlockCache;
use crate::codec::{Codec, CodecError};
use crate::entry::{BlockHandle, Entry, Footer, IndexEntry};

#[derive(Debug, Error)]
pub enum SstableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt SSTable: {0}")]
    Corrupt(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl SstableError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, SstableError::Corrupt(_))
            || matches!(self, SstableError::Codec(CodecError::Mismatch))
    }
}

/// An open, memory-mapped SSTable file.
pub struct Sstable {
    path: PathBuf,
    mmap: Mmap,
    codec: Codec,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    min_key: String,
    max_key: String,
    level: u32,
    entry_count: u64,
    cache: Option<Arc<BlockCache>>,
    block_decodes: AtomicU64,
}

impl Sstable {
    /// Opens and validates an SSTable file written by [`SstableBuilder`],
    /// with no block cache attached.
    pub fn open<P: AsRef<Path>>(path: P, codec: Codec) -> Result<Self, SstableError> {
        Self::open_with_cache(path, codec, None)
    }

    /// Opens a table, routing point-lookup block decodes through
    /// `cache` when present.
    pub fn open_with_cache<P: AsRef<Path>>(
        path: P,
        codec: Codec,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self, SstableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < Footer::ENCODED_SIZE {
            return Err(SstableError::Corrupt("file shorter than footer".into()));
        }
        let footer_start = mmap.len() - Footer::ENCODED_SIZE;
        let footer = Footer::decode_from(&mmap[footer_start..])
            .ok_or_else(|| SstableError::Corrupt("bad footer magic".into()))?;

        let meta_bytes = slice_for(&mmap, footer.meta_handle)?;
        let (meta, bloom) = decode_meta(meta_bytes)?;

        let index_bytes = slice_for(&mmap, footer.index_handle)?;
        let index = decode_index(index_bytes)?;

        trace!(path = %path.display(), blocks = index.len(), "SSTable opened");

        Ok(Sstable {
            path,
            mmap,
            codec,
            index,
            bloom,
            min_key: meta.min_key,
            max_key: meta.max_key,
            level: meta.level,
            entry_count: meta.entry_count,
            cache,
            block_decodes: AtomicU64::new(0),
        })
    }

    /// Number of times this table has decompressed and decoded a data
    /// block (cache hits excluded) since it was opened. A diagnostic
    /// for measuring bloom-filter read amplification, not used by any
    /// correctness path.
    pub fn block_decode_count(&self) -> u64 {
        self.block_decodes.load(AtomicOrdering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn min_key(&self) -> &str {
        &self.min_key
    }

    pub fn max_key(&self) -> &str {
        &self.max_key
    }

    /// Cheap pre-check: `false` means `key` is definitely absent.
    pub fn may_contain(&self, key: &str) -> bool {
        if key < self.min_key.as_str() || key > self.max_key.as_str() {
            return false;
        }
        self.bloom.contains(key.as_bytes())
    }

    /// Looks up `key`, decoding at most one data block. Consults and
    /// populates the block cache, when attached.
    pub fn get(&self, key: &str) -> Result<Option<Entry>, SstableError> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        let Some(handle) = self.locate_block(key) else {
            return Ok(None);
        };

        if let Some(cache) = &self.cache {
            if let Some(entries) = cache.get(&self.path, handle.offset) {
                return Ok(entries.iter().find(|e| e.key == key).cloned());
            }
        }
        let entries = Arc::new(self.decode_block_at(handle)?);
        if let Some(cache) = &self.cache {
            cache.put(&self.path, handle.offset, entries.clone());
        }
        Ok(entries.iter().find(|e| e.key == key).cloned())
    }

    /// Returns every entry in the table, in key order. Used by
    /// compaction, which needs whole-table streams rather than
    /// point lookups — bypasses the block cache, since a one-shot
    /// sequential scan would otherwise evict every hot block behind it.
    pub fn scan(&self) -> Result<Vec<Entry>, SstableError> {
        let mut out = Vec::with_capacity(self.entry_count as usize);
        for index_entry in &self.index {
            out.extend(self.decode_block_at(index_entry.handle)?);
        }
        Ok(out)
    }

    /// Finds the block handle that could hold `key`: first any block
    /// whose inclusive `[start_key, end_key]` range contains it, else
    /// (the secondary probe) the first block whose `start_key > key`.
    fn locate_block(&self, key: &str) -> Option<BlockHandle> {
        let exact = self
            .index
            .binary_search_by(|candidate| {
                if key < candidate.start_key.as_str() {
                    std::cmp::Ordering::Greater
                } else if key > candidate.end_key.as_str() {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok();
        if let Some(idx) = exact {
            return Some(self.index[idx].handle);
        }
        self.index
            .iter()
            .find(|candidate| candidate.start_key.as_str() > key)
            .map(|candidate| candidate.handle)
    }

    fn decode_block_at(&self, handle: BlockHandle) -> Result<Vec<Entry>, SstableError> {
        self.block_decodes.fetch_add(1, AtomicOrdering::Relaxed);
        let compressed = slice_for(&self.mmap, handle)?;
        let raw = self.codec.decompress(compressed)?;
        block::decode_block(&raw).map_err(|e| SstableError::Corrupt(e.to_string()))
    }
}

fn slice_for(mmap: &Mmap, handle: BlockHandle) -> Result<&[u8], SstableError> {
    let start = handle.offset as usize;
    let end = start + handle.length as usize;
    mmap.get(start..end)
        .ok_or_else(|| SstableError::Corrupt("block handle out of bounds".into()))
}

fn decode_string(buf: &[u8]) -> Result<(String, usize), SstableError> {
    if buf.len() < 4 {
        return Err(SstableError::Corrupt("truncated string length".into()));
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + len {
        return Err(SstableError::Corrupt("truncated string bytes".into()));
    }
    let s = String::from_utf8(buf[4..4 + len].to_vec())
        .map_err(|_| SstableError::Corrupt("non-UTF-8 string".into()))?;
    Ok((s, 4 + len))
}

struct DecodedMeta {
    min_key: String,
    max_key: String,
    level: u32,
    entry_count: u64,
}

fn decode_meta(buf: &[u8]) -> Result<(DecodedMeta, BloomFilter), SstableError> {
    if buf.len() < 8 + 4 + 8 {
        return Err(SstableError::Corrupt("truncated meta block header".into()));
    }
    let mut off = 0;
    let _created_unix = i64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    off += 8;
    let level = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    off += 4;
    let entry_count = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    off += 8;

    let (min_key, n) = decode_string(&buf[off..])?;
    off += n;
    let (max_key, n) = decode_string(&buf[off..])?;
    off += n;

    let (bloom, _) = BloomFilter::decode_from(&buf[off..])
        .ok_or_else(|| SstableError::Corrupt("bad bloom filter encoding".into()))?;

    Ok((
        DecodedMeta {
            min_key,
            max_key,
            level,
            entry_count,
        },
        bloom,
    ))
}

fn decode_index(buf: &[u8]) -> Result<Vec<IndexEntry>, SstableError> {
    let (_data_block_handle, mut off) = BlockHandle::decode_from(buf)
        .ok_or_else(|| SstableError::Corrupt("truncated index data-block handle".into()))?;

    if buf.len() < off + 4 {
        return Err(SstableError::Corrupt("truncated index entry count".into()));
    }
    let count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) as usize;
    off += 4;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (start_key, n) = decode_string(&buf[off..])?;
        off += n;
        let (end_key, n) = decode_string(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])
            .ok_or_else(|| SstableError::Corrupt("truncated index block handle".into()))?;
        off += n;
        entries.push(IndexEntry {
            start_key,
            end_key,
            handle,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use tempfile::tempdir;

    fn build_table(path: &Path, entries: Vec<Entry>, data_block_size: usize) {
        let builder = SstableBuilder::new(data_block_size, Codec::None, 0.01, 0);
        builder.build(path, entries).unwrap();
    }

    #[test]
    fn build_then_open_and_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.sst");
        let entries = vec![
            Entry::new("a".into(), b"1".to_vec(), false, 1),
            Entry::new("b".into(), b"2".to_vec(), false, 1),
            Entry::new("c".into(), b"3".to_vec(), false, 1),
        ];
        build_table(&path, entries, 4096);

        let table = Sstable::open(&path, Codec::None).unwrap();
        assert_eq!(table.get("a").unwrap().unwrap().value, b"1");
        assert_eq!(table.get("c").unwrap().unwrap().value, b"3");
        assert!(table.get("z").unwrap().is_none());
    }

    #[test]
    fn many_keys_span_multiple_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.sst");
        let entries: Vec<Entry> = (0..500)
            .map(|i| Entry::new(format!("k{i:05}"), vec![i as u8; 20], false, 1))
            .collect();
        build_table(&path, entries.clone(), 256);

        let table = Sstable::open(&path, Codec::None).unwrap();
        assert!(table.index.len() > 1, "expected multiple data blocks");
        for e in &entries {
            assert_eq!(table.get(&e.key).unwrap().unwrap().value, e.value);
        }
        assert!(table.get("zzz").unwrap().is_none());
    }

    #[test]
    fn scan_returns_all_entries_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.sst");
        let mut entries: Vec<Entry> = (0..200)
            .map(|i| Entry::new(format!("k{i:04}"), vec![], false, 1))
            .collect();
        build_table(&path, entries.clone(), 128);
        entries.sort();

        let table = Sstable::open(&path, Codec::None).unwrap();
        let scanned = table.scan().unwrap();
        assert_eq!(scanned, entries);
    }

    #[test]
    fn compressed_round_trip_with_gzip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.sst");
        let builder = SstableBuilder::new(4096, Codec::Gzip, 0.01, 1);
        let entries = vec![Entry::new("k".into(), b"value".to_vec(), false, 1)];
        builder.build(&path, entries).unwrap();

        let table = Sstable::open(&path, Codec::Gzip).unwrap();
        assert_eq!(table.get("k").unwrap().unwrap().value, b"value");
        assert_eq!(table.level(), 1);
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.sst");
        std::fs::write(&path, b"too short").unwrap();
        assert!(Sstable::open(&path, Codec::None).is_err());
    }

    #[test]
    fn bloom_rejects_absent_key_without_block_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.sst");
        build_table(
            &path,
            vec![Entry::new("present".into(), vec![], false, 1)],
            4096,
        );
        let table = Sstable::open(&path, Codec::None).unwrap();
        assert!(!table.may_contain("definitely-absent-key"));
    }
}
