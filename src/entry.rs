//! Core record and on-disk handle types.
//!
//! An [`Entry`] is the immutable unit the whole engine moves around:
//! memtables hold them, WAL records encode them, SSTable blocks store
//! them. Ordering is primary by key (byte order), secondary by
//! timestamp descending — so that for equal keys, the newer entry
//! always sorts first.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single record in the store: a key, its value (or tombstone), and
/// the timestamp used to resolve multiple writes to the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub tombstone: bool,
    pub timestamp: i64,
}

impl Entry {
    /// Builds an entry for a `set`. `timestamp` of `0` means "assign one
    /// at ingress".
    pub fn new(key: String, value: Vec<u8>, tombstone: bool, timestamp: i64) -> Self {
        let timestamp = if timestamp == 0 {
            Self::now_millis()
        } else {
            timestamp
        };
        Entry {
            key,
            value,
            tombstone,
            timestamp,
        }
    }

    pub fn put(key: String, value: Vec<u8>) -> Self {
        Self::new(key, value, false, 0)
    }

    pub fn delete(key: String) -> Self {
        Self::new(key, Vec::new(), true, 0)
    }

    /// Estimated in-memory footprint, used by the memtable's accounted
    /// size and by the block builder's "estimate-before" block-size
    /// heuristic: the split decision uses this estimate, never the
    /// measured compressed size.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Entry>() + self.key.len() + self.value.len()
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .as_bytes()
            .cmp(other.key.as_bytes())
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

/// A byte range within an SSTable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub length: u64,
}

impl BlockHandle {
    pub const ENCODED_SIZE: usize = 16;

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.length.to_le_bytes());
    }

    pub fn decode_from(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < Self::ENCODED_SIZE {
            return None;
        }
        let offset = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        let length = u64::from_le_bytes(buf[8..16].try_into().ok()?);
        Some((BlockHandle { offset, length }, Self::ENCODED_SIZE))
    }
}

/// One entry in an SSTable's index block: the inclusive key range
/// covered by a data block plus its [`BlockHandle`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub start_key: String,
    pub end_key: String,
    pub handle: BlockHandle,
}

/// Table-level metadata written once, right before the index block.
#[derive(Debug, Clone)]
pub struct MetaBlock {
    pub created_unix: i64,
    pub level: u32,
    pub entry_count: u64,
    pub min_key: String,
    pub max_key: String,
}

/// Fixed-size trailer identifying an SSTable file.
#[derive(Debug, Clone, Copy)]
pub struct Footer {
    pub meta_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub const MAGIC: u64 = 0x1234567890ABCDEF;
    /// Two handles (16 bytes each) plus the 8-byte magic.
    pub const ENCODED_SIZE: usize = BlockHandle::ENCODED_SIZE * 2 + 8;

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        self.meta_handle.encode_to(buf);
        self.index_handle.encode_to(buf);
        buf.extend_from_slice(&Self::MAGIC.to_le_bytes());
    }

    pub fn decode_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_SIZE {
            return None;
        }
        let (meta_handle, n) = BlockHandle::decode_from(buf)?;
        let (index_handle, n2) = BlockHandle::decode_from(&buf[n..])?;
        let magic_off = n + n2;
        let magic = u64::from_le_bytes(buf[magic_off..magic_off + 8].try_into().ok()?);
        if magic != Self::MAGIC {
            return None;
        }
        Some(Footer {
            meta_handle,
            index_handle,
        })
    }
}
