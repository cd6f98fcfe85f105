//! Block index arena
//!
//! Every header ever accepted gets one entry. Entries are never removed, only
//! marked invalid, so an [`EntryId`] stays valid for the life of the index.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::consensus::{BlockHeader, Work};
use crate::crypto::Hash;
use crate::peg::PegState;

/// Position of an entry in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Header passed its checks; the block has not been connected
    HeaderOnly,
    /// Connected to the active chain at least once
    Validated,
    /// Failed validation, or descends from a block that did
    Invalid,
}

/// One known block header and everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEntry {
    pub hash: Hash,
    pub header: BlockHeader,
    pub height: u64,
    /// Total work of the chain ending here
    pub chain_work: Work,
    /// Order in which the header was first seen
    pub seq: u64,
    pub status: BlockStatus,
    /// Full block body is available
    pub has_data: bool,
    /// This block and all its ancestors have bodies
    pub chain_data: bool,
    /// Peg state after connecting this block; set once validated
    pub peg: Option<PegState>,
}

impl BlockIndexEntry {
    pub fn parent_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn is_invalid(&self) -> bool {
        self.status == BlockStatus::Invalid
    }

    pub fn is_validated(&self) -> bool {
        self.status == BlockStatus::Validated
    }

    pub fn candidate_key(&self, id: EntryId) -> CandidateKey {
        CandidateKey {
            work: self.chain_work,
            seq: self.seq,
            hash: self.hash,
            id,
        }
    }
}

/// Fork-choice ordering of tip candidates. The greatest key wins: most work,
/// then earliest first-seen, then the smaller hash.
#[derive(Debug, Clone, Copy)]
pub struct CandidateKey {
    pub work: Work,
    pub seq: u64,
    pub hash: Hash,
    pub id: EntryId,
}

impl Ord for CandidateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.work
            .cmp(&other.work)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| other.hash.cmp(&self.hash))
    }
}

impl PartialOrd for CandidateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CandidateKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CandidateKey {}

/// Arena of entries plus the parent/child links between them
#[derive(Debug, Default)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
    parents: Vec<Option<EntryId>>,
    children: Vec<Vec<EntryId>>,
    by_hash: HashMap<Hash, EntryId>,
    next_seq: u64,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number for the next header seen.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn insert(&mut self, entry: BlockIndexEntry, parent: Option<EntryId>) -> EntryId {
        let id = EntryId(self.entries.len());
        self.by_hash.insert(entry.hash, id);
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.entries.push(entry);
        self.parents.push(parent);
        self.children.push(Vec::new());
        if let Some(parent) = parent {
            self.children[parent.0].push(id);
        }
        id
    }

    pub fn id_of(&self, hash: &Hash) -> Option<EntryId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, id: EntryId) -> &BlockIndexEntry {
        &self.entries[id.0]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut BlockIndexEntry {
        &mut self.entries[id.0]
    }

    pub fn lookup(&self, hash: &Hash) -> Option<&BlockIndexEntry> {
        self.id_of(hash).map(|id| self.get(id))
    }

    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.parents[id.0]
    }

    pub fn children(&self, id: EntryId) -> &[EntryId] {
        &self.children[id.0]
    }

    /// All entries below `id`, breadth first, not including `id` itself.
    pub fn descendants(&self, id: EntryId) -> Vec<EntryId> {
        let mut found = Vec::new();
        let mut queue: VecDeque<EntryId> = self.children(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            found.push(next);
            queue.extend(self.children(next).iter().copied());
        }
        found
    }

    /// Timestamps of `id` and up to `count - 1` of its ancestors, newest first.
    pub fn recent_timestamps(&self, id: EntryId, count: usize) -> Vec<u64> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if out.len() == count {
                break;
            }
            out.push(self.get(current).timestamp());
            cursor = self.parent(current);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &BlockIndexEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (EntryId(i), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
