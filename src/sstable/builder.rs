//! SSTable builder: writes the on-disk file format from a sorted,
//! deduplicated entry set.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::bloom::BloomFilter;
use crate::codec::Codec;
use crate::entry::{BlockHandle, Entry, Footer, MetaBlock};
use crate::error::Error;

use super::block::{encode_block, estimated_entry_size};

/// Builds one SSTable file from a sorted entry set.
pub struct SstableBuilder {
    data_block_size: usize,
    codec: Codec,
    bloom_fpr: f64,
    level: u32,
}

impl SstableBuilder {
    pub fn new(data_block_size: usize, codec: Codec, bloom_fpr: f64, level: u32) -> Self {
        SstableBuilder {
            data_block_size,
            codec,
            bloom_fpr,
            level,
        }
    }

    /// Writes `entries` (assumed already deduplicated per key) to
    /// `path`. Refuses empty input.
    pub fn build(&self, path: &Path, mut entries: Vec<Entry>) -> Result<(), Error> {
        if entries.is_empty() {
            return Err(Error::bad_input("cannot build an SSTable from zero entries"));
        }
        entries.sort_by(|a, b| a.key.as_bytes().cmp(b.key.as_bytes()));

        let min_key = entries.first().unwrap().key.clone();
        let max_key = entries.last().unwrap().key.clone();
        let entry_count = entries.len() as u64;

        let bloom = BloomFilter::build(entries.iter().map(|e| e.key.as_bytes()), self.bloom_fpr);

        let mut file = File::create(path)?;
        let mut offset: u64 = 0;
        let mut index_entries: Vec<(String, String, BlockHandle)> = Vec::new();

        let mut current_block: Vec<Entry> = Vec::new();
        let mut current_size: usize = 0;
        let mut prev_key_in_block = String::new();

        for entry in entries.into_iter() {
            let additional = estimated_entry_size(&prev_key_in_block, &entry);
            if !current_block.is_empty() && current_size + additional > self.data_block_size {
                offset = self.flush_block(&mut file, offset, &current_block, &mut index_entries)?;
                current_block.clear();
                current_size = 0;
                prev_key_in_block.clear();
            }
            prev_key_in_block = entry.key.clone();
            current_size += estimated_entry_size(
                if current_block.is_empty() {
                    ""
                } else {
                    current_block.last().unwrap().key.as_str()
                },
                &entry,
            );
            current_block.push(entry);
        }
        if !current_block.is_empty() {
            offset = self.flush_block(&mut file, offset, &current_block, &mut index_entries)?;
        }

        let data_block_handle = BlockHandle {
            offset: 0,
            length: offset,
        };

        let meta = MetaBlock {
            created_unix: now_unix(),
            level: self.level,
            entry_count,
            min_key,
            max_key,
        };
        let meta_bytes = encode_meta(&meta, &bloom);
        let meta_offset = offset;
        file.write_all(&meta_bytes)?;
        offset += meta_bytes.len() as u64;
        let meta_handle = BlockHandle {
            offset: meta_offset,
            length: meta_bytes.len() as u64,
        };

        let index_bytes = encode_index(&data_block_handle, &index_entries);
        let index_offset = offset;
        file.write_all(&index_bytes)?;
        #[allow(unused_assignments)]
        {
            offset += index_bytes.len() as u64;
        }
        let index_handle = BlockHandle {
            offset: index_offset,
            length: index_bytes.len() as u64,
        };

        let footer = Footer {
            meta_handle,
            index_handle,
        };
        let mut footer_bytes = Vec::with_capacity(Footer::ENCODED_SIZE);
        footer.encode_to(&mut footer_bytes);
        file.write_all(&footer_bytes)?;
        file.sync_all()?;

        debug!(
            path = %path.display(),
            entry_count,
            blocks = index_entries.len(),
            "SSTable built"
        );
        Ok(())
    }

    fn flush_block(
        &self,
        file: &mut File,
        offset: u64,
        block: &[Entry],
        index_entries: &mut Vec<(String, String, BlockHandle)>,
    ) -> Result<u64, Error> {
        let raw = encode_block(block);
        let compressed = self
            .codec
            .compress(&raw)
            .map_err(|_| Error::corruption("block compression failed"))?;
        file.write_all(&compressed)?;

        let handle = BlockHandle {
            offset,
            length: compressed.len() as u64,
        };
        let first_key = block.first().unwrap().key.clone();
        let last_key = block.last().unwrap().key.clone();
        trace!(offset, len = compressed.len(), entries = block.len(), "data block flushed");
        index_entries.push((first_key, last_key, handle));
        Ok(offset + compressed.len() as u64)
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs() as i64
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub(super) fn encode_meta(meta: &MetaBlock, bloom: &BloomFilter) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&meta.created_unix.to_le_bytes());
    buf.extend_from_slice(&meta.level.to_le_bytes());
    buf.extend_from_slice(&meta.entry_count.to_le_bytes());
    encode_string(&mut buf, &meta.min_key);
    encode_string(&mut buf, &meta.max_key);
    bloom.encode_to(&mut buf);
    buf
}

fn encode_index(
    data_block_handle: &BlockHandle,
    entries: &[(String, String, BlockHandle)],
) -> Vec<u8> {
    let mut buf = Vec::new();
    data_block_handle.encode_to(&mut buf);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (start, end, handle) in entries {
        encode_string(&mut buf, start);
        encode_string(&mut buf, end);
        handle.encode_to(&mut buf);
    }
    buf
}
