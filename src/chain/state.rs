//! Chain state
//!
//! Owns the block index, the active chain, block bodies with their undo data
//! and the UTXO set of the active tip. All of it is mutated together, which is
//! why the node keeps a `ChainState` behind a single lock.
//!
//! Moving the tip goes through [`ChainState::switch_to`], which stages every
//! effect of the reorg (reverts, connects, peg states) and commits only after
//! the whole path has validated. A failed switch leaves the tip where it was.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{BlockIndex, BlockIndexEntry, BlockStatus, CandidateKey, EntryId, OrphanPool};
use crate::config::ChainParams;
use crate::consensus::{
    block_work, check_block, check_header, check_timestamp, connect_transactions,
    median_time_past, Block, BlockHeader, BlockVerifier, DecodeError, RejectReason, Work,
    MEDIAN_TIME_SPAN,
};
use crate::crypto::Hash;
use crate::peg::{PegInterval, PegProjection, PegState, PegVotes};
use crate::storage::{BlockUndo, UTXOSet, UtxoView};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block {0} already known")]
    Duplicate(Hash),
    #[error("Orphan block {hash}: parent {parent} unknown")]
    Orphan { hash: Hash, parent: Hash },
    #[error("Block {hash} rejected: {reason}")]
    ConsensusRejected { hash: Hash, reason: RejectReason },
    #[error("Unknown block {0}")]
    UnknownBlock(Hash),
    #[error("Block {0} is not on the active chain")]
    NotOnActiveChain(Hash),
    #[error("Chain state integrity failure: {0}")]
    Integrity(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAccepted {
    pub hash: Hash,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAccepted {
    pub hash: Hash,
    pub height: u64,
    /// Whether the block ended up on the active chain
    pub on_active_chain: bool,
}

/// Consistent view of the tip, taken in one critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub height: u64,
    pub tip_hash: Hash,
    pub tip_time: u64,
    pub chain_work: Work,
    pub best_header_work: Work,
    pub supply_index: u32,
    pub next_supply_index: PegProjection,
    /// Always `Pending`, carrying the next interval's value forward
    pub next_next_supply_index: PegProjection,
    pub votes: PegVotes,
    /// First height of the current voting interval, `None` before voting starts
    pub interval_start: Option<u64>,
    pub peg_start_height: u64,
}

/// Entries changed since the last call to [`ChainState::take_dirty`].
#[derive(Debug, Default)]
pub struct IndexDelta {
    pub entries: Vec<BlockIndexEntry>,
    /// Rejection reasons of the changed entries that are invalid
    pub failures: Vec<(Hash, RejectReason)>,
    /// New active tip, if it moved
    pub tip: Option<Hash>,
}

enum SwitchFailure {
    Rejected { id: EntryId, reason: RejectReason },
    Integrity(String),
}

fn rejected(hash: Hash, reason: RejectReason) -> ChainError {
    ChainError::ConsensusRejected { hash, reason }
}

pub struct ChainState {
    params: ChainParams,
    verifier: Arc<dyn BlockVerifier>,
    index: BlockIndex,
    /// `active[h]` is the entry at height `h` on the best chain
    active: Vec<EntryId>,
    tip: EntryId,
    best_header: EntryId,
    bodies: HashMap<Hash, Block>,
    undo: HashMap<Hash, BlockUndo>,
    utxos: UTXOSet,
    /// Entries that could become the tip. Always contains the tip.
    candidates: BTreeSet<CandidateKey>,
    failures: HashMap<Hash, RejectReason>,
    orphans: OrphanPool,
    dirty: HashSet<EntryId>,
    tip_moved: bool,
}

impl std::fmt::Debug for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainState")
            .field("network", &self.params.network)
            .field("height", &self.height())
            .field("tip", &self.tip_hash())
            .field("headers", &self.index.len())
            .field("orphans", &self.orphans.len())
            .finish()
    }
}

impl ChainState {
    /// Start a chain from its genesis block. Genesis is trusted as given.
    pub fn new(
        params: ChainParams,
        genesis: Block,
        verifier: Arc<dyn BlockVerifier>,
    ) -> Result<Self, ChainError> {
        if !genesis.is_genesis() {
            return Err(ChainError::Integrity("genesis block has a parent".into()));
        }

        let hash = genesis.hash();
        let mut utxos = UTXOSet::new();
        for tx in &genesis.transactions {
            utxos.add_outputs(tx, 0);
        }

        let mut index = BlockIndex::new();
        let seq = index.next_seq();
        let entry = BlockIndexEntry {
            hash,
            header: genesis.header.clone(),
            height: 0,
            chain_work: block_work(genesis.header.bits),
            seq,
            status: BlockStatus::Validated,
            has_data: true,
            chain_data: true,
            peg: Some(PegState::genesis(&params.peg)),
        };
        let id = index.insert(entry, None);
        let key = index.get(id).candidate_key(id);

        let mut bodies = HashMap::new();
        bodies.insert(hash, genesis);

        info!(network = params.network.name(), genesis = %hash, "chain state initialised");

        Ok(Self {
            orphans: OrphanPool::new(params.max_orphans),
            params,
            verifier,
            index,
            active: vec![id],
            tip: id,
            best_header: id,
            bodies,
            undo: HashMap::new(),
            utxos,
            candidates: BTreeSet::from([key]),
            failures: HashMap::new(),
            dirty: HashSet::from([id]),
            tip_moved: true,
        })
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a header to the index. Orphans are queued and reported as
    /// `ChainError::Orphan`; repeats are `ChainError::Duplicate`.
    pub fn insert_header(&mut self, header: &BlockHeader) -> Result<HeaderAccepted, ChainError> {
        let id = self.index_header(header)?;
        let entry = self.index.get(id);
        let accepted = HeaderAccepted {
            hash: entry.hash,
            height: entry.height,
        };
        self.resolve_orphans(accepted.hash);
        self.activate_best_chain()?;
        Ok(accepted)
    }

    /// Supply a full block. Indexes its header if needed, validates it and
    /// moves the tip if it now leads the best chain.
    pub fn connect_block(&mut self, block: Block) -> Result<BlockAccepted, ChainError> {
        let hash = block.hash();
        let id = match self.index.id_of(&hash) {
            Some(id) => {
                let entry = self.index.get(id);
                if entry.is_invalid() {
                    return Err(rejected(hash, self.failure_reason(&hash)));
                }
                if entry.has_data {
                    return Err(ChainError::Duplicate(hash));
                }
                id
            }
            None => match self.index_header(&block.header) {
                Ok(id) => {
                    self.resolve_orphans(hash);
                    id
                }
                Err(err @ ChainError::Orphan { .. }) => {
                    let header = block.header.clone();
                    self.orphans.insert(header, Some(block));
                    return Err(err);
                }
                Err(err) => return Err(err),
            },
        };

        self.attach_body(id, block)?;
        self.activate_best_chain()?;

        let entry = self.index.get(id);
        if entry.is_invalid() {
            return Err(rejected(hash, self.failure_reason(&hash)));
        }
        Ok(BlockAccepted {
            hash,
            height: entry.height,
            on_active_chain: self.is_active(id),
        })
    }

    /// Rebuild the candidate set from every connectable entry and move to
    /// the best one. Returns the resulting tip.
    pub fn reconsider_best_tip(&mut self) -> Result<Hash, ChainError> {
        self.candidates = self
            .index
            .iter()
            .filter(|(_, entry)| entry.chain_data && !entry.is_invalid())
            .map(|(id, entry)| entry.candidate_key(id))
            .collect();
        self.activate_best_chain()?;
        Ok(self.tip_hash())
    }

    /// Rewind the active chain to `ancestor`, undoing blocks from the tip down.
    ///
    /// The rewound blocks stay validated but leave the candidate set, so the
    /// tip stays at `ancestor` until `reconsider_best_tip` or a new block
    /// extending them. Returns the disconnected hashes, tip first.
    pub fn disconnect_to(&mut self, ancestor: &Hash) -> Result<Vec<Hash>, ChainError> {
        let id = self
            .index
            .id_of(ancestor)
            .ok_or(ChainError::UnknownBlock(*ancestor))?;
        if !self.is_active(id) {
            return Err(ChainError::NotOnActiveChain(*ancestor));
        }
        let height = self.index.get(id).height as usize;
        let removed: Vec<EntryId> = self.active[height + 1..].iter().rev().copied().collect();
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let mut view = UtxoView::new(&self.utxos);
        for &rid in &removed {
            self.revert_into(&mut view, rid)
                .map_err(ChainError::Integrity)?;
        }
        let changes = view.into_changes();

        self.utxos.apply_changes(changes);
        self.active.truncate(height + 1);
        for &rid in &removed {
            let key = self.index.get(rid).candidate_key(rid);
            self.candidates.remove(&key);
        }
        self.set_tip(id);

        info!(
            depth = removed.len(),
            height = height as u64,
            tip = %ancestor,
            "disconnected blocks"
        );
        Ok(removed.iter().map(|&rid| self.index.get(rid).hash).collect())
    }

    /// Re-apply a rejection recorded before a restart. Descendants become
    /// invalid with it; the active chain is never touched.
    pub fn restore_invalid(&mut self, hash: &Hash, reason: RejectReason) -> Result<(), ChainError> {
        let id = self.index.id_of(hash).ok_or(ChainError::UnknownBlock(*hash))?;
        if self.is_active(id) {
            return Err(ChainError::Integrity(format!(
                "stored rejection for active block {}",
                hash
            )));
        }
        if self.index.get(id).is_invalid() {
            return Ok(());
        }
        self.mark_invalid(id, reason);
        Ok(())
    }

    /// Drain the entries and tip changes not yet persisted.
    pub fn take_dirty(&mut self) -> IndexDelta {
        let mut ids: Vec<EntryId> = self.dirty.drain().collect();
        ids.sort();
        let tip = std::mem::take(&mut self.tip_moved).then(|| self.tip_hash());
        let entries: Vec<BlockIndexEntry> =
            ids.into_iter().map(|id| self.index.get(id).clone()).collect();
        let failures = entries
            .iter()
            .filter(|entry| entry.is_invalid())
            .filter_map(|entry| {
                self.failures
                    .get(&entry.hash)
                    .map(|reason| (entry.hash, reason.clone()))
            })
            .collect();
        IndexDelta {
            entries,
            failures,
            tip,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn height(&self) -> u64 {
        self.tip_entry().height
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip_entry().hash
    }

    pub fn tip_entry(&self) -> &BlockIndexEntry {
        self.index.get(self.tip)
    }

    pub fn genesis_hash(&self) -> Hash {
        self.index.get(self.active[0]).hash
    }

    pub fn entry(&self, hash: &Hash) -> Option<&BlockIndexEntry> {
        self.index.lookup(hash)
    }

    pub fn block(&self, hash: &Hash) -> Option<&Block> {
        self.bodies.get(hash)
    }

    pub fn hash_at_height(&self, height: u64) -> Option<Hash> {
        self.active
            .get(height as usize)
            .map(|&id| self.index.get(id).hash)
    }

    pub fn is_on_active_chain(&self, hash: &Hash) -> bool {
        self.index.id_of(hash).is_some_and(|id| self.is_active(id))
    }

    /// Active-chain hashes from `start` upward, at most `count` of them.
    pub fn active_range(&self, start: u64, count: usize) -> Vec<Hash> {
        self.active
            .iter()
            .skip(start as usize)
            .take(count)
            .map(|&id| self.index.get(id).hash)
            .collect()
    }

    pub fn peg_state(&self) -> PegState {
        self.tip_entry()
            .peg
            .unwrap_or_else(|| PegState::genesis(&self.params.peg))
    }

    pub fn peg_interval(&self) -> Option<PegInterval> {
        self.peg_state().interval(self.height(), &self.params.peg)
    }

    pub fn best_header(&self) -> &BlockIndexEntry {
        self.index.get(self.best_header)
    }

    /// Why a block was marked invalid, if it was.
    pub fn failure(&self, hash: &Hash) -> Option<&RejectReason> {
        self.failures.get(hash)
    }

    pub fn utxos(&self) -> &UTXOSet {
        &self.utxos
    }

    pub fn header_count(&self) -> usize {
        self.index.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.orphans.contains(hash)
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let tip = self.tip_entry();
        let peg = self.peg_state();
        ChainSnapshot {
            height: tip.height,
            tip_hash: tip.hash,
            tip_time: tip.timestamp(),
            chain_work: tip.chain_work,
            best_header_work: self.best_header().chain_work,
            supply_index: peg.supply_index,
            next_supply_index: peg.next,
            next_next_supply_index: peg.next_next(),
            votes: peg.votes,
            interval_start: self.params.peg.interval_start(tip.height),
            peg_start_height: self.params.peg.start_height,
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn is_active(&self, id: EntryId) -> bool {
        let height = self.index.get(id).height as usize;
        self.active.get(height) == Some(&id)
    }

    fn failure_reason(&self, hash: &Hash) -> RejectReason {
        self.failures
            .get(hash)
            .cloned()
            .unwrap_or(RejectReason::InvalidAncestor)
    }

    fn index_header(&mut self, header: &BlockHeader) -> Result<EntryId, ChainError> {
        let hash = header.hash();
        if self.index.contains(&hash) {
            return Err(ChainError::Duplicate(hash));
        }

        let Some(parent_id) = self.index.id_of(&header.prev_hash) else {
            self.orphans.insert(header.clone(), None);
            debug!(%hash, parent = %header.prev_hash, "queued orphan header");
            return Err(ChainError::Orphan {
                hash,
                parent: header.prev_hash,
            });
        };

        let parent = self.index.get(parent_id);
        if parent.is_invalid() {
            return Err(rejected(hash, RejectReason::InvalidAncestor));
        }
        check_header(header, &self.params).map_err(|reason| rejected(hash, reason))?;
        let median = median_time_past(&self.index.recent_timestamps(parent_id, MEDIAN_TIME_SPAN));
        check_timestamp(header, median).map_err(|reason| rejected(hash, reason))?;

        let height = parent.height + 1;
        let chain_work = parent.chain_work.saturating_add(block_work(header.bits));
        let seq = self.index.next_seq();
        let id = self.index.insert(
            BlockIndexEntry {
                hash,
                header: header.clone(),
                height,
                chain_work,
                seq,
                status: BlockStatus::HeaderOnly,
                has_data: false,
                chain_data: false,
                peg: None,
            },
            Some(parent_id),
        );
        self.dirty.insert(id);

        if chain_work > self.best_header().chain_work {
            self.best_header = id;
        }
        debug!(height, %hash, "indexed header");
        Ok(id)
    }

    /// Index every queued orphan that descends from `parent`.
    fn resolve_orphans(&mut self, parent: Hash) {
        let mut queue = VecDeque::from([parent]);
        while let Some(parent) = queue.pop_front() {
            for orphan in self.orphans.take_children(&parent) {
                let hash = orphan.header.hash();
                match self.index_header(&orphan.header) {
                    Ok(id) => {
                        queue.push_back(hash);
                        if let Some(block) = orphan.block {
                            if let Err(err) = self.attach_body(id, block) {
                                debug!(%hash, %err, "orphan body rejected");
                            }
                        }
                    }
                    Err(err) => debug!(%hash, %err, "dropping orphan"),
                }
            }
        }
    }

    /// Store a body against its entry after the checks that need no UTXO
    /// context. A merkle mismatch only means the body does not belong to this
    /// header, so the entry is left valid in that case.
    fn attach_body(&mut self, id: EntryId, block: Block) -> Result<(), ChainError> {
        let entry = self.index.get(id);
        let (hash, height) = (entry.hash, entry.height);

        if let Err(reason) = check_block(&block, height) {
            warn!(%hash, height, %reason, "block failed validation");
            if reason != RejectReason::InvalidMerkleRoot {
                self.mark_invalid(id, reason.clone());
            }
            return Err(rejected(hash, reason));
        }

        self.bodies.insert(hash, block);
        self.index.get_mut(id).has_data = true;
        self.dirty.insert(id);

        let parent_ready = self
            .index
            .parent(id)
            .map_or(true, |parent| self.index.get(parent).chain_data);
        if parent_ready {
            self.propagate_chain_data(id);
        }
        Ok(())
    }

    /// Mark `id` and every descendant with a body as connectable.
    fn propagate_chain_data(&mut self, id: EntryId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let entry = self.index.get_mut(current);
            if entry.is_invalid() {
                continue;
            }
            entry.chain_data = true;
            let key = entry.candidate_key(current);
            self.candidates.insert(key);
            self.dirty.insert(current);

            stack.extend(self.index.children(current).iter().copied().filter(|&child| {
                let child = self.index.get(child);
                child.has_data && !child.chain_data
            }));
        }
    }

    fn mark_invalid(&mut self, id: EntryId, reason: RejectReason) {
        let root = self.index.get(id).hash;
        warn!(hash = %root, %reason, "marking block invalid");
        self.failures.insert(root, reason);

        for target in std::iter::once(id).chain(self.index.descendants(id)) {
            let entry = self.index.get_mut(target);
            let key = entry.candidate_key(target);
            entry.status = BlockStatus::Invalid;
            let hash = entry.hash;
            self.candidates.remove(&key);
            self.dirty.insert(target);
            self.failures.entry(hash).or_insert(RejectReason::InvalidAncestor);
        }

        if self.index.get(self.best_header).is_invalid() {
            self.recompute_best_header();
        }
    }

    fn recompute_best_header(&mut self) {
        let best = self
            .index
            .iter()
            .filter(|(_, entry)| !entry.is_invalid())
            .max_by_key(|(id, entry)| entry.candidate_key(*id))
            .map(|(id, _)| id);
        if let Some(best) = best {
            self.best_header = best;
        }
    }

    /// Move to the best candidate until the tip is the best candidate.
    /// Each rejected switch invalidates at least one candidate, so this ends.
    fn activate_best_chain(&mut self) -> Result<(), ChainError> {
        loop {
            let Some(best) = self.candidates.last().copied() else {
                break;
            };
            if best.id == self.tip {
                break;
            }
            match self.switch_to(best.id) {
                Ok(()) => {}
                Err(SwitchFailure::Rejected { id, reason }) => self.mark_invalid(id, reason),
                Err(SwitchFailure::Integrity(msg)) => return Err(ChainError::Integrity(msg)),
            }
        }

        // Anything ordered below the tip can never win while the tip stands.
        let tip_key = self.tip_entry().candidate_key(self.tip);
        self.candidates = self.candidates.split_off(&tip_key);
        Ok(())
    }

    /// Reorganise onto `target`, all or nothing.
    fn switch_to(&mut self, target: EntryId) -> Result<(), SwitchFailure> {
        let fork = self.find_fork(target);
        let fork_height = self.index.get(fork).height as usize;
        let disconnect: Vec<EntryId> = self.active[fork_height + 1..].iter().rev().copied().collect();

        let mut path = Vec::new();
        let mut cursor = target;
        while cursor != fork {
            path.push(cursor);
            cursor = self.index.parent(cursor).ok_or_else(|| {
                SwitchFailure::Integrity("branch does not reach the active chain".into())
            })?;
        }
        path.reverse();

        let mut view = UtxoView::new(&self.utxos);
        for &id in &disconnect {
            self.revert_into(&mut view, id).map_err(SwitchFailure::Integrity)?;
        }

        let mut peg = self.index.get(fork).peg.ok_or_else(|| {
            SwitchFailure::Integrity(format!("fork point {} has no peg state", self.index.get(fork).hash))
        })?;
        let mut staged = Vec::with_capacity(path.len());
        for &id in &path {
            let entry = self.index.get(id);
            let block = self.bodies.get(&entry.hash).ok_or_else(|| {
                SwitchFailure::Integrity(format!("missing body for {}", entry.hash))
            })?;
            self.verifier
                .verify_block(block, entry.height)
                .map_err(|msg| SwitchFailure::Rejected {
                    id,
                    reason: RejectReason::ScriptFailure(msg),
                })?;
            let undo = connect_transactions(block, entry.height, &mut view, &self.params)
                .map_err(|reason| SwitchFailure::Rejected { id, reason })?;
            peg = peg.advance(entry.height, block.peg_vote, &self.params.peg);
            staged.push((id, undo, peg));
        }
        let changes = view.into_changes();

        self.utxos.apply_changes(changes);
        self.active.truncate(fork_height + 1);
        for (id, undo, peg) in staged {
            let entry = self.index.get_mut(id);
            entry.status = BlockStatus::Validated;
            entry.peg = Some(peg);
            self.undo.insert(entry.hash, undo);
            self.active.push(id);
            self.dirty.insert(id);
        }
        self.set_tip(target);

        let tip = self.tip_entry();
        if disconnect.is_empty() {
            info!(height = tip.height, hash = %tip.hash, "new best tip");
        } else {
            warn!(
                depth = disconnect.len(),
                fork_height = fork_height as u64,
                height = tip.height,
                hash = %tip.hash,
                "chain reorganisation"
            );
        }
        Ok(())
    }

    fn set_tip(&mut self, id: EntryId) {
        self.tip = id;
        self.tip_moved = true;
        let key = self.index.get(id).candidate_key(id);
        self.candidates.insert(key);
    }

    /// Highest ancestor of `id` (or `id` itself) on the active chain.
    fn find_fork(&self, id: EntryId) -> EntryId {
        let mut cursor = id;
        while !self.is_active(cursor) {
            match self.index.parent(cursor) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        cursor
    }

    fn revert_into(&self, view: &mut UtxoView<'_>, id: EntryId) -> Result<(), String> {
        let hash = self.index.get(id).hash;
        let block = self
            .bodies
            .get(&hash)
            .ok_or_else(|| format!("missing body for {hash}"))?;
        let undo = self
            .undo
            .get(&hash)
            .ok_or_else(|| format!("missing undo data for {hash}"))?;
        view.revert_block(&block.transactions, undo)
            .map_err(|(tx, index)| format!("undo data for {hash} disagrees at {tx}:{index}"))
    }
}
