//! Bounded pool of headers (and possibly bodies) whose parent is unknown

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::consensus::{Block, BlockHeader};
use crate::crypto::Hash;

#[derive(Debug, Clone)]
pub struct Orphan {
    pub header: BlockHeader,
    pub block: Option<Block>,
}

/// Oldest-first eviction once `capacity` is reached.
#[derive(Debug)]
pub struct OrphanPool {
    capacity: usize,
    orphans: HashMap<Hash, Orphan>,
    by_parent: HashMap<Hash, Vec<Hash>>,
    arrival: VecDeque<Hash>,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            orphans: HashMap::new(),
            by_parent: HashMap::new(),
            arrival: VecDeque::new(),
        }
    }

    /// Queue an orphan. A repeat of a queued header only attaches the body if
    /// one is given. Returns the hashes evicted to make room.
    pub fn insert(&mut self, header: BlockHeader, block: Option<Block>) -> Vec<Hash> {
        let hash = header.hash();
        if let Some(existing) = self.orphans.get_mut(&hash) {
            if existing.block.is_none() {
                existing.block = block;
            }
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.orphans.len() >= self.capacity {
            match self.arrival.pop_front() {
                Some(oldest) => {
                    self.forget(&oldest);
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted oldest orphans");
        }

        self.by_parent.entry(header.prev_hash).or_default().push(hash);
        self.arrival.push_back(hash);
        self.orphans.insert(hash, Orphan { header, block });
        evicted
    }

    /// Remove and return every orphan waiting on `parent`, in arrival order.
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Orphan> {
        let Some(hashes) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        self.arrival.retain(|h| !hashes.contains(h));
        hashes
            .iter()
            .filter_map(|hash| self.orphans.remove(hash))
            .collect()
    }

    fn forget(&mut self, hash: &Hash) {
        let Some(orphan) = self.orphans.remove(hash) else {
            return;
        };
        let parent = orphan.header.prev_hash;
        if let Some(siblings) = self.by_parent.get_mut(&parent) {
            siblings.retain(|h| h != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.orphans.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
