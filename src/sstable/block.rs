//! Data block encoding: prefix-compressed entries, pre-compression.
//!
//! ```text
//! for each entry in block:
//!   u16 common_prefix_len   // relative to previous key in this block
//!   u16 suffix_len
//!   bytes suffix            // key[common_prefix_len..]
//!   u32 value_len
//!   bytes value
//!   u8   tombstone
//!   i64  timestamp
//! ```
//!
//! The "previous key" resets at every data block boundary — prefix
//! compression never crosses blocks.

use crate::entry::Entry;
use crate::error::Error;

/// Encodes `entries` (already sorted ascending by key, one block's
/// worth) into the pre-compression block byte layout.
pub fn encode_block(entries: &[Entry]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut prev_key: &str = "";
    for entry in entries {
        let common = common_prefix_len(prev_key, &entry.key);
        let suffix = &entry.key.as_bytes()[common..];

        buf.extend_from_slice(&(common as u16).to_le_bytes());
        buf.extend_from_slice(&(suffix.len() as u16).to_le_bytes());
        buf.extend_from_slice(suffix);
        buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.value);
        buf.push(entry.tombstone as u8);
        buf.extend_from_slice(&entry.timestamp.to_le_bytes());

        prev_key = &entry.key;
    }
    buf
}

/// Estimates the pre-compression size a block would have after adding
/// `entry` on top of `running_total`, given `prev_key` (the last key
/// already in the block, or `""` at a block boundary). Used to decide
/// whether adding this entry would cross `data_block_size` — decided
/// against the estimate, never the actual compressed size ("estimate-
/// before" splitting).
pub fn estimated_entry_size(prev_key: &str, entry: &Entry) -> usize {
    let common = common_prefix_len(prev_key, &entry.key);
    let suffix_len = entry.key.len() - common;
    2 + 2 + suffix_len + 4 + entry.value.len() + 1 + 8
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .take_while(|(x, y)| x == y)
        .count()
        .min(u16::MAX as usize)
}

/// Decodes a fully-decompressed block back into its entries, in order.
pub fn decode_block(bytes: &[u8]) -> Result<Vec<Entry>, Error> {
    let mut entries = Vec::new();
    let mut prev_key = String::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < 4 {
            return Err(Error::corruption("truncated block entry header"));
        }
        let common_prefix_len = u16::from_le_bytes(rest[0..2].try_into().unwrap()) as usize;
        let suffix_len = u16::from_le_bytes(rest[2..4].try_into().unwrap()) as usize;
        offset += 4;

        let rest = &bytes[offset..];
        if rest.len() < suffix_len {
            return Err(Error::corruption("truncated block key suffix"));
        }
        let suffix = &rest[..suffix_len];
        offset += suffix_len;

        if common_prefix_len > prev_key.len() {
            return Err(Error::corruption("invalid common prefix length"));
        }
        let mut key_bytes = prev_key.as_bytes()[..common_prefix_len].to_vec();
        key_bytes.extend_from_slice(suffix);
        let key = String::from_utf8(key_bytes).map_err(|_| Error::corruption("non-UTF-8 key"))?;

        let rest = &bytes[offset..];
        if rest.len() < 4 {
            return Err(Error::corruption("truncated value length"));
        }
        let value_len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        offset += 4;

        let rest = &bytes[offset..];
        if rest.len() < value_len + 1 + 8 {
            return Err(Error::corruption("truncated value/tombstone/timestamp"));
        }
        let value = rest[..value_len].to_vec();
        offset += value_len;

        let tombstone = bytes[offset] != 0;
        offset += 1;

        let timestamp = i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;

        prev_key = key.clone();
        entries.push(Entry {
            key,
            value,
            tombstone,
            timestamp,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let entries = vec![
            Entry::new("apple".into(), b"1".to_vec(), false, 10),
            Entry::new("application".into(), b"2".to_vec(), false, 20),
            Entry::new("banana".into(), vec![], true, 30),
        ];
        let encoded = encode_block(&entries);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_block_round_trips() {
        let decoded = decode_block(&encode_block(&[])).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn rejects_truncated_bytes() {
        let entries = vec![Entry::new("k".into(), b"v".to_vec(), false, 1)];
        let mut encoded = encode_block(&entries);
        encoded.truncate(encoded.len() - 2);
        assert!(decode_block(&encoded).is_err());
    }
}
