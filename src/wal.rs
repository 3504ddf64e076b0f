//! Write-ahead log.
//!
//! Append-only, `fsync`-durable log of [`Entry`] records. Record layout
//! (little-endian):
//!
//! ```text
//! record := u32 key_len | key_bytes
//!         | u32 value_len | value_bytes
//!         | u8  tombstone (0|1)
//!         | i64 timestamp_ms
//! ```
//!
//! `write` serializes under a mutex and durably flushes before
//! returning; `read` streams records until EOF and stops at the first
//! decoding error, returning whatever was read so far (tail corruption
//! is not fatal); `delete` closes and unlinks the file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::entry::Entry;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WAL is closed")]
    Closed,

    #[error("key is not valid UTF-8")]
    InvalidUtf8,
}

impl WalError {
    pub fn is_corruption(&self) -> bool {
        false
    }
}

struct WalState {
    file: Option<File>,
    path: PathBuf,
}

/// An append-only, durable log of [`Entry`] records backing one
/// memtable.
pub struct Wal {
    state: Mutex<WalState>,
}

impl Wal {
    /// Opens (creating if necessary) a WAL file for append.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        debug!(path = %path.display(), "WAL opened");
        Ok(Wal {
            state: Mutex::new(WalState {
                file: Some(file),
                path,
            }),
        })
    }

    /// Appends all `entries` as a single write, flushes, and fsyncs
    /// before returning. Any failure leaves the memtable state
    /// unchanged — callers must not mutate the in-memory index until
    /// this returns `Ok`.
    pub fn write(&self, entries: &[Entry]) -> Result<(), WalError> {
        let mut guard = self.state.lock().expect("WAL mutex poisoned");
        let file = guard.file.as_mut().ok_or(WalError::Closed)?;

        let mut buf = Vec::new();
        for entry in entries {
            encode_record(entry, &mut buf);
        }
        file.write_all(&buf)?;
        file.flush()?;
        file.sync_all()?;
        trace!(count = entries.len(), bytes = buf.len(), "WAL write");
        Ok(())
    }

    /// Streams all records currently on disk. Stops and returns
    /// whatever was read so far on the first decoding error — a
    /// truncated tail is treated as a recoverable, not fatal,
    /// condition.
    pub fn read(&self) -> Result<Vec<Entry>, WalError> {
        let mut guard = self.state.lock().expect("WAL mutex poisoned");
        let file = guard.file.as_mut().ok_or(WalError::Closed)?;
        file.flush().ok();

        let mut reader = BufReader::new(
            OpenOptions::new()
                .read(true)
                .open(&guard.path)?,
        );
        let mut entries = Vec::new();
        loop {
            match decode_record(&mut reader) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        path = %guard.path.display(),
                        error = %e,
                        read_so_far = entries.len(),
                        "WAL truncated tail; stopping replay"
                    );
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Closes and unlinks the file. Subsequent operations fail with
    /// [`WalError::Closed`].
    pub fn delete(&self) -> Result<(), WalError> {
        let mut guard = self.state.lock().expect("WAL mutex poisoned");
        guard.file.take();
        if guard.path.exists() {
            std::fs::remove_file(&guard.path)?;
        }
        debug!(path = %guard.path.display(), "WAL deleted");
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.state.lock().expect("WAL mutex poisoned").path.clone()
    }
}

fn encode_record(entry: &Entry, buf: &mut Vec<u8>) {
    let key_bytes = entry.key.as_bytes();
    buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
    buf.extend_from_slice(&entry.value);
    buf.push(entry.tombstone as u8);
    buf.extend_from_slice(&entry.timestamp.to_le_bytes());
}

/// Decodes one record from `reader`. `Ok(None)` signals a clean EOF at
/// a record boundary; `Err` signals a mid-record truncation or
/// malformed length.
fn decode_record<R: Read>(reader: &mut R) -> Result<Option<Entry>, WalError> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(reader, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let key_len = u32::from_le_bytes(len_buf) as usize;

    let mut key_bytes = vec![0u8; key_len];
    reader.read_exact(&mut key_bytes)?;
    let key = String::from_utf8(key_bytes).map_err(|_| WalError::InvalidUtf8)?;

    let mut value_len_buf = [0u8; 4];
    reader.read_exact(&mut value_len_buf)?;
    let value_len = u32::from_le_bytes(value_len_buf) as usize;

    let mut value = vec![0u8; value_len];
    reader.read_exact(&mut value)?;

    let mut tombstone_buf = [0u8; 1];
    reader.read_exact(&mut tombstone_buf)?;
    let tombstone = tombstone_buf[0] != 0;

    let mut ts_buf = [0u8; 8];
    reader.read_exact(&mut ts_buf)?;
    let timestamp = i64::from_le_bytes(ts_buf);

    Ok(Some(Entry {
        key,
        value,
        tombstone,
        timestamp,
    }))
}

/// Like `read_exact`, but distinguishes "zero bytes available" (clean
/// EOF, returns `Ok(false)`) from a short/partial read (an error —
/// the caller is mid-record).
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => {
                if total == 0 {
                    return Ok(false);
                }
                return Err(WalError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated WAL record",
                )));
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WalError::Io(e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal_1.wal")).unwrap();
        let entries = vec![
            Entry::new("a".into(), b"1".to_vec(), false, 100),
            Entry::new("b".into(), vec![], true, 200),
        ];
        wal.write(&entries).unwrap();
        let replayed = wal.read().unwrap();
        assert_eq!(replayed, entries);
    }

    #[test]
    fn read_stops_at_truncated_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal_1.wal");
        let wal = Wal::open(&path).unwrap();
        wal.write(&[Entry::new("a".into(), b"1".to_vec(), false, 1)])
            .unwrap();

        // append a second, good record then truncate it mid-write
        let mut buf = Vec::new();
        encode_record(&Entry::new("b".into(), b"22".to_vec(), false, 2), &mut buf);
        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(&buf[..buf.len() - 3]).unwrap();
        raw.sync_all().unwrap();
        drop(raw);

        let entries = wal.read().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "a");
    }

    #[test]
    fn delete_unlinks_and_closes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal_1.wal");
        let wal = Wal::open(&path).unwrap();
        wal.write(&[Entry::new("a".into(), vec![], false, 1)])
            .unwrap();
        wal.delete().unwrap();
        assert!(!path.exists());
        assert!(matches!(wal.write(&[]), Err(WalError::Closed)));
    }

    #[test]
    fn empty_wal_reads_no_entries() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal_1.wal")).unwrap();
        assert!(wal.read().unwrap().is_empty());
    }
}
