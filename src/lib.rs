//! # stratumdb
//!
//! An embeddable, disk-backed ordered key-value store built on a
//! **Log-Structured Merge Tree (LSM-tree)**: writes land in an
//! in-memory memtable behind a write-ahead log, memtables flush into
//! immutable, bloom-filtered SSTables, and a background worker keeps
//! the on-disk levels within their size targets via leveled
//! compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Database                           │
//! │  ┌────────────┐   flush   ┌──────────────┐                │
//! │  │  Active     │ ────────▶│  L0 SSTables │                │
//! │  │  Memtable   │          │  (overlapping)│                │
//! │  │  + WAL      │          └──────┬───────┘                │
//! │  └─────────────┘                 │ compact_l0              │
//! │                                  ▼                         │
//! │                          ┌──────────────┐                  │
//! │                          │  L1 SSTables │                  │
//! │                          │  (disjoint)  │                  │
//! │                          └──────┬───────┘                  │
//! │                                 │ compact_level(1..n)       │
//! │                                 ▼        ...                │
//! │                          ┌──────────────┐                  │
//! │                          │  Ln SSTables │                  │
//! │                          └──────────────┘                  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The `Database` façade — open, get, set, delete, flush, compact, close |
//! | [`config`] | Tunable parameters with documented reference defaults |
//! | [`entry`] | Core record type and on-disk handle/footer structures |
//! | [`memtable`] | WAL-backed in-memory write buffer |
//! | [`index`] | Concurrent ordered skip list backing the memtable |
//! | [`wal`] | Fixed-layout write-ahead log |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters |
//! | [`level`] | Level manager: admission, lookup, and leveled compaction |
//! | [`cache`] | Bounded LRU cache of decoded SSTable data blocks |
//! | [`bloom`] | Seeded-FNV-1a bloom filter |
//! | [`merge`] | K-way sorted-stream merge used by flush and compaction |
//! | [`codec`] | Block compression (`none`, `gzip`, `deflate`) |
//! | [`error`] | Crate-wide error type |
//!
//! ## Key properties
//!
//! - **Write-ahead logging** — every mutation is durable (`fsync`'d)
//!   before the in-memory index is touched.
//! - **Single version per key** — the newest write (by flush/compaction
//!   order, not wall-clock) always wins; no MVCC, no range tombstones.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter
//!   sized from the table's own key set, ruling out most negative
//!   point lookups without touching disk.
//! - **Leveled compaction** — L0 tables may overlap; L1 and deeper are
//!   kept disjoint, bounding the number of tables a point lookup must
//!   consult.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stratumdb::{Config, Database};
//!
//! let db = Database::open("/tmp/my_db", Config::default()).unwrap();
//!
//! db.set("hello", b"world".to_vec()).unwrap();
//! assert_eq!(db.get("hello").unwrap(), Some(b"world".to_vec()));
//!
//! db.delete("hello").unwrap();
//! assert_eq!(db.get("hello").unwrap(), None);
//!
//! db.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod index;
pub mod level;
pub mod memtable;
pub mod merge;
pub mod sstable;
pub mod wal;

pub use config::Config;
pub use engine::Database;
pub use entry::Entry;
pub use error::{Error, Result};
