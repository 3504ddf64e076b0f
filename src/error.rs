//! Crate-wide error type.
//!
//! Every subsystem (`wal`, `sstable`, `bloom`, `level`) defines its own
//! `thiserror` enum; [`Error`] aggregates them at the façade boundary and
//! maps them onto five top-level error kinds: `BadInput`, `Closed`,
//! `IO`, `Corruption`, `Conflict`.

use std::io;

use thiserror::Error;

use crate::memtable::MemtableError;
use crate::sstable::SstableError;
use crate::wal::WalError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public [`crate::Database`] API.
#[derive(Debug, Error)]
pub enum Error {
    /// Null/empty key, or otherwise malformed input rejected at the façade.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Operation attempted after `close()`.
    #[error("closed")]
    Closed,

    /// Read/write/delete failed at the OS boundary.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Footer magic mismatch, decompression failure, or truncated record
    /// mid-entry. Logged and contained where possible; never poisons the
    /// engine.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Attempted write to a read-only memtable, or another internal
    /// invariant violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying SSTable failure.
    #[error("SSTable error: {0}")]
    Sstable(#[from] SstableError),
}

impl From<MemtableError> for Error {
    fn from(e: MemtableError) -> Self {
        match e {
            MemtableError::Wal(wal_err) => Error::Wal(wal_err),
            MemtableError::ReadOnly => Error::conflict("memtable is read-only"),
        }
    }
}

impl Error {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Error::BadInput(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// True for errors that indicate the file/record was corrupt rather
    /// than a hard I/O failure — used by recovery to decide "skip and
    /// log" vs "propagate".
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
            || matches!(self, Error::Sstable(e) if e.is_corruption())
            || matches!(self, Error::Wal(e) if e.is_corruption())
    }
}
