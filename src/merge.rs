//! K-way merge.
//!
//! Merges `S` sorted entry streams, oldest to newest, into one sorted
//! output with exactly one surviving entry per key: the one from the
//! newest stream (ties within a stream resolved by last-occurrence-
//! wins). Implemented with a min-heap over `(entry, stream_index)`;
//! `O(N log S)`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::entry::Entry;

/// One heap item: an entry plus the index of the stream it came from.
/// Higher `stream_index` means newer. Heap order is by `Entry` (key
/// asc, timestamp desc within a key), then by `stream_index` descending
/// so that, for identical keys, the newest stream is popped first.
struct HeapItem {
    entry: Entry,
    stream_index: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry && self.stream_index == other.stream_index
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .cmp(&other.entry)
            .then_with(|| other.stream_index.cmp(&self.stream_index))
    }
}

/// Whether the merge output will be placed at the bottommost level that
/// could hold any of the merged keys. Only then can tombstones be
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TombstoneDisposition {
    /// Keep tombstones — a deeper level might still hold an older value.
    Retain,
    /// Drop tombstones once no earlier-in-output entry for the same key
    /// remains to be superseded.
    DropAtBottom,
}

/// Merges `streams` (oldest first, newest last) into one sorted,
/// deduplicated stream, using [`Reverse`] to turn the `BinaryHeap` (a
/// max-heap) into a min-heap over key order.
pub fn merge_streams<I>(
    streams: Vec<I>,
    disposition: TombstoneDisposition,
) -> impl Iterator<Item = Entry>
where
    I: Iterator<Item = Entry>,
{
    MergeIter {
        heap: BinaryHeap::new(),
        streams: streams.into_iter().map(Some).collect(),
        disposition,
        last_key: None,
        primed: false,
    }
}

struct MergeIter<I> {
    heap: BinaryHeap<Reverse<HeapItem>>,
    streams: Vec<Option<I>>,
    disposition: TombstoneDisposition,
    last_key: Option<String>,
    primed: bool,
}

impl<I> MergeIter<I>
where
    I: Iterator<Item = Entry>,
{
    fn prime(&mut self) {
        for (idx, stream) in self.streams.iter_mut().enumerate() {
            if let Some(s) = stream {
                if let Some(entry) = s.next() {
                    self.heap.push(Reverse(HeapItem {
                        entry,
                        stream_index: idx,
                    }));
                } else {
                    *stream = None;
                }
            }
        }
        self.primed = true;
    }

    fn pull_next(&mut self, stream_index: usize) {
        if let Some(Some(stream)) = self.streams.get_mut(stream_index) {
            if let Some(entry) = stream.next() {
                self.heap.push(Reverse(HeapItem {
                    entry,
                    stream_index,
                }));
            } else {
                self.streams[stream_index] = None;
            }
        }
    }
}

impl<I> Iterator for MergeIter<I>
where
    I: Iterator<Item = Entry>,
{
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if !self.primed {
            self.prime();
        }

        loop {
            let Reverse(HeapItem {
                entry,
                stream_index,
            }) = self.heap.pop()?;
            self.pull_next(stream_index);

            // Drop older versions of the same key: keep popping while
            // the heap top shares this key (it will be older, since the
            // newest-stream tie-break already put the winner first).
            while let Some(Reverse(top)) = self.heap.peek() {
                if top.entry.key == entry.key {
                    let Reverse(HeapItem {
                        stream_index: dup_stream,
                        ..
                    }) = self.heap.pop().unwrap();
                    self.pull_next(dup_stream);
                } else {
                    break;
                }
            }

            let is_dup_of_last = self.last_key.as_deref() == Some(entry.key.as_str());
            if is_dup_of_last {
                // Shouldn't happen given the de-dup loop above, but keep
                // the invariant explicit rather than silently emitting
                // two winners for one key.
                continue;
            }
            self.last_key = Some(entry.key.clone());

            if entry.tombstone && self.disposition == TombstoneDisposition::DropAtBottom {
                // Bottommost output: no older source can resurrect this
                // key, so the tombstone itself carries no information
                // worth keeping.
                continue;
            }

            return Some(entry);
        }
    }
}
