//! Concurrent ordered index.
//!
//! A randomized skip list (max 32 levels, level-up probability 0.5)
//! holding the latest [`Entry`] per key. A single mutex guards
//! `upsert`/`scan`; `get` takes a shared read-through path. Nodes live
//! in a flat arena (`Vec<Node>`) addressed by index rather than as a
//! `Box`-linked structure — this keeps the whole skip list safe code
//! while still giving the expected `O(log n)` expected search path.
//!
//! Correctness of the per-key ordering guarantee does not depend on
//! lock granularity, only on the WAL-before-index write order enforced
//! by [`crate::memtable::Memtable`].

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};

use rand::Rng;

use crate::entry::Entry;

const MAX_LEVEL: usize = 32;
const LEVEL_UP_PROBABILITY: f64 = 0.5;
const HEAD: usize = 0;

struct Node {
    entry: Option<Entry>, // None only for the head sentinel at index HEAD
    forward: Vec<Option<usize>>,
}

struct SkipList {
    nodes: Vec<Node>,
    level: usize,
}

impl SkipList {
    fn new() -> Self {
        SkipList {
            nodes: vec![Node {
                entry: None,
                forward: vec![None; MAX_LEVEL],
            }],
            level: 1,
        }
    }

    fn key_at(&self, idx: usize) -> &str {
        self.nodes[idx].entry.as_ref().expect("non-head node").key.as_str()
    }

    /// Finds, for each level, the last node whose key is strictly less
    /// than `key` (the head counts as "less than everything").
    fn find_predecessors(&self, key: &str) -> [usize; MAX_LEVEL] {
        let mut update = [HEAD; MAX_LEVEL];
        let mut current = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[current].forward[i] {
                if self.key_at(next) < key {
                    current = next;
                } else {
                    break;
                }
            }
            update[i] = current;
        }
        update
    }

    fn random_level() -> usize {
        let mut level = 1;
        let mut rng = rand::rng();
        while level < MAX_LEVEL && rng.random_bool(LEVEL_UP_PROBABILITY) {
            level += 1;
        }
        level
    }

    /// Returns the size delta (new entry size minus old, or new entry
    /// size if this is a fresh key) and whether a new node was created.
    fn upsert(&mut self, entry: Entry) -> (i64, bool) {
        let update = self.find_predecessors(&entry.key);
        let candidate = self.nodes[update[0]].forward[0];

        if let Some(existing) = candidate {
            if self.key_at(existing) == entry.key {
                let old_size = self.nodes[existing]
                    .entry
                    .as_ref()
                    .unwrap()
                    .estimated_size() as i64;
                let new_size = entry.estimated_size() as i64;
                self.nodes[existing].entry = Some(entry);
                return (new_size - old_size, false);
            }
        }

        let new_level = Self::random_level();
        let mut update = update;
        if new_level > self.level {
            for slot in update.iter_mut().take(new_level).skip(self.level) {
                *slot = HEAD;
            }
            self.level = new_level;
        }

        let new_size = entry.estimated_size() as i64;
        let new_idx = self.nodes.len();
        let mut forward = vec![None; MAX_LEVEL];
        for i in 0..new_level {
            forward[i] = self.nodes[update[i]].forward[i];
        }
        self.nodes.push(Node {
            entry: Some(entry),
            forward,
        });
        for (i, pred) in update.iter().enumerate().take(new_level) {
            self.nodes[*pred].forward[i] = Some(new_idx);
        }

        (new_size, true)
    }

    fn get(&self, key: &str) -> Option<Entry> {
        let update = self.find_predecessors(key);
        let candidate = self.nodes[update[0]].forward[0]?;
        if self.key_at(candidate) == key {
            self.nodes[candidate].entry.clone()
        } else {
            None
        }
    }

    fn scan(&self) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut current = self.nodes[HEAD].forward[0];
        while let Some(idx) = current {
            out.push(self.nodes[idx].entry.clone().unwrap());
            current = self.nodes[idx].forward[0];
        }
        out
    }
}

/// Thread-safe, ordered key -> [`Entry`] map backed by a skip list.
pub struct ConcurrentIndex {
    inner: RwLock<SkipList>,
    write_lock: Mutex<()>,
    len: AtomicU64,
    accounted_size: AtomicU64,
}

impl ConcurrentIndex {
    pub fn new() -> Self {
        ConcurrentIndex {
            inner: RwLock::new(SkipList::new()),
            write_lock: Mutex::new(()),
            len: AtomicU64::new(0),
            accounted_size: AtomicU64::new(0),
        }
    }

    /// Inserts `entry`, replacing any existing entry for the same key
    /// and adjusting the accounted size by the delta of estimated
    /// entry sizes.
    pub fn upsert(&self, entry: Entry) {
        let _guard = self.write_lock.lock().expect("index write lock poisoned");
        let mut list = self.inner.write().expect("index lock poisoned");
        let (delta, is_new) = list.upsert(entry);
        drop(list);
        self.adjust_size(delta);
        if is_new {
            self.len.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        let list = self.inner.read().expect("index lock poisoned");
        list.get(key)
    }

    /// Returns all entries in key order.
    pub fn scan(&self) -> Vec<Entry> {
        let _guard = self.write_lock.lock().expect("index write lock poisoned");
        let list = self.inner.read().expect("index lock poisoned");
        list.scan()
    }

    fn adjust_size(&self, delta: i64) {
        if delta >= 0 {
            self.accounted_size
                .fetch_add(delta as u64, AtomicOrdering::SeqCst);
        } else {
            self.accounted_size
                .fetch_sub((-delta) as u64, AtomicOrdering::SeqCst);
        }
    }

    pub fn len(&self) -> u64 {
        self.len.load(AtomicOrdering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn accounted_size(&self) -> u64 {
        self.accounted_size.load(AtomicOrdering::SeqCst)
    }
}

impl Default for ConcurrentIndex {
    fn default() -> Self {
        Self::new()
    }
}
