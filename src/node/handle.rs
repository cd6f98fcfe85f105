//! Node facade
//!
//! `Node` owns every lock and decides what runs under which. Disk writes
//! happen before the chain lock is taken (block bodies) or after it is
//! released (index entries and tip). Height announcements are enqueued while
//! the chain lock is still held so they stay in step with the tip; every
//! other event is published after its lock is released. Publishing never
//! blocks and subscribers handle events on their own tasks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use primitive_types::U256;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::genesis_block;
use crate::alert::{Alert, AlertError, AlertStore, SignedAlert};
use crate::chain::{
    BlockAccepted, BlockIndexEntry, BlockStatus, ChainError, ChainSnapshot, ChainState, HeaderAccepted,
    IndexDelta,
};
use crate::config::{ChainParams, ConfigError, NodeConfig};
use crate::consensus::{Block, BlockHeader, BlockVerifier, NoScriptChecks, RejectReason};
use crate::crypto::Hash;
use crate::notify::{EventBus, NodeEvent, Subscription};
use crate::p2p::{ConnectionId, NodeShortStat, PeerHandshake, PeerTable};
use crate::peg::{PegProjection, PegVotes};
use crate::storage::{BlockStore, StoreError};
use crate::sync::{SyncInputs, SyncTracker};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub struct Node {
    params: ChainParams,
    chain: Mutex<ChainState>,
    peers: PeerTable,
    alerts: RwLock<AlertStore>,
    sync: SyncTracker,
    bus: EventBus,
    store: Option<BlockStore>,
    /// Last height announced on the bus
    announced_height: AtomicU64,
    blocks_at_startup: u64,
    started_at: u64,
    rescan_batch: usize,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("network", &self.params.network)
            .field("persistent", &self.store.is_some())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Node {
    /// Open a node with no script checks.
    pub fn open(config: &NodeConfig) -> Result<Self, NodeError> {
        Self::open_with_verifier(config, Arc::new(NoScriptChecks))
    }

    /// Open a node, replaying the block store if `data_dir` is set.
    pub fn open_with_verifier(
        config: &NodeConfig,
        verifier: Arc<dyn BlockVerifier>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let params = config.chain_params();
        let store = match &config.data_dir {
            Some(dir) => Some(BlockStore::open(dir)?),
            None => None,
        };

        let chain = ChainState::new(params.clone(), genesis_block(&params), verifier)?;
        let mut node = Self {
            chain: Mutex::new(chain),
            peers: PeerTable::new(),
            alerts: RwLock::new(AlertStore::new(params.alert_public_keys()?)),
            sync: SyncTracker::new(params.max_tip_age_secs),
            bus: EventBus::new(config.bus_capacity),
            store,
            announced_height: AtomicU64::new(0),
            blocks_at_startup: 0,
            started_at: unix_now(),
            rescan_batch: config.rescan_batch,
            params,
        };

        node.replay()?;
        let height = node.chain.lock().height();
        node.blocks_at_startup = height;
        node.announced_height.store(height, Ordering::SeqCst);
        info!(network = node.params.network.name(), height, "node ready");
        Ok(node)
    }

    /// Rebuild the chain from the store: headers in first-seen order, then
    /// stored rejections, then bodies by height.
    fn replay(&self) -> Result<(), NodeError> {
        let Some(store) = &self.store else {
            let delta = self.chain.lock().take_dirty();
            debug!(entries = delta.entries.len(), "in-memory node, nothing to replay");
            return Ok(());
        };

        let entries = store.load_entries()?;
        let stored_tip = store.load_tip()?;
        let mut failures = store.load_failures()?;
        if entries.is_empty() {
            let delta = self.chain.lock().take_dirty();
            return self.persist(delta).map_err(NodeError::from);
        }

        self.sync.set_importing(true);
        info!(entries = entries.len(), "replaying block store");

        for entry in entries.iter().filter(|e| e.height > 0) {
            let result = self.chain.lock().insert_header(&entry.header);
            match result {
                Ok(_) | Err(ChainError::Duplicate(_)) => {}
                Err(err) => debug!(hash = %entry.hash, %err, "stored header not replayed"),
            }
        }

        // Only roots are restored; their descendants inherit InvalidAncestor.
        let invalid: HashSet<Hash> = entries
            .iter()
            .filter(|e| e.status == BlockStatus::Invalid)
            .map(|e| e.hash)
            .collect();
        for entry in entries.iter().filter(|e| invalid.contains(&e.hash)) {
            if invalid.contains(&entry.header.prev_hash) {
                continue;
            }
            let reason = failures
                .remove(&entry.hash)
                .unwrap_or(RejectReason::InvalidAncestor);
            let result = self.chain.lock().restore_invalid(&entry.hash, reason);
            if let Err(err) = result {
                debug!(hash = %entry.hash, %err, "stored rejection not restored");
            }
        }

        let mut with_bodies: Vec<&BlockIndexEntry> =
            entries.iter().filter(|e| e.has_data && e.height > 0).collect();
        with_bodies.sort_by_key(|e| (e.height, e.seq));
        for entry in with_bodies {
            let Some(block) = store.get_block(&entry.hash)? else {
                warn!(hash = %entry.hash, "indexed body missing from store");
                continue;
            };
            let result = self.chain.lock().connect_block(block);
            match result {
                Ok(_) | Err(ChainError::Duplicate(_)) => {}
                Err(ChainError::Integrity(msg)) => return Err(ChainError::Integrity(msg).into()),
                Err(err) => debug!(hash = %entry.hash, %err, "stored block not replayed"),
            }
        }

        let (tip, delta) = {
            let mut chain = self.chain.lock();
            (chain.tip_hash(), chain.take_dirty())
        };
        self.persist(delta)?;
        self.sync.set_importing(false);

        match stored_tip {
            Some(stored) if stored != tip => {
                warn!(%stored, replayed = %tip, "replayed tip differs from stored tip")
            }
            _ => info!(%tip, "block store replayed"),
        }
        Ok(())
    }

    fn persist(&self, delta: IndexDelta) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if delta.entries.is_empty() && delta.tip.is_none() {
            return Ok(());
        }
        store.save_index(&delta.entries, &delta.failures, delta.tip.as_ref())
    }

    /// Publish the height if it differs from the last one published. Callers
    /// hold the chain lock.
    fn announce_height(&self, height: u64) {
        if self.announced_height.swap(height, Ordering::SeqCst) != height {
            self.bus.publish(NodeEvent::BestHeightChanged(height));
        }
    }

    /// Run a chain mutation and announce the resulting height, then persist
    /// with the lock released.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut ChainState) -> Result<T, ChainError>,
    ) -> Result<T, NodeError> {
        let (result, delta) = {
            let mut chain = self.chain.lock();
            let result = op(&mut chain);
            self.announce_height(chain.height());
            (result, chain.take_dirty())
        };
        self.persist(delta)?;
        Ok(result?)
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    pub fn submit_header(&self, header: &BlockHeader) -> Result<HeaderAccepted, NodeError> {
        self.mutate(|chain| chain.insert_header(header))
    }

    pub fn submit_block(&self, block: Block) -> Result<BlockAccepted, NodeError> {
        if let Some(store) = &self.store {
            store.save_block(&block)?;
        }
        self.mutate(|chain| chain.connect_block(block))
    }

    pub fn reconsider_best_tip(&self) -> Result<Hash, NodeError> {
        self.mutate(ChainState::reconsider_best_tip)
    }

    pub fn disconnect_to(&self, ancestor: &Hash) -> Result<Vec<Hash>, NodeError> {
        self.mutate(|chain| chain.disconnect_to(ancestor))
    }

    pub fn receive_alert(&self, signed: &SignedAlert) -> Result<Alert, AlertError> {
        let admitted = self.alerts.write().receive(signed, unix_now())?;
        for change in admitted.changes {
            self.bus.publish(NodeEvent::AlertChanged {
                hash: change.hash,
                status: change.status,
                priority: change.priority,
                text: change.text,
            });
        }
        Ok(admitted.alert)
    }

    pub fn peer_connected(&self, id: ConnectionId, handshake: PeerHandshake) {
        if let Some(count) = self.peers.connect(id, handshake) {
            self.publish_connections(count);
        }
    }

    pub fn peer_disconnected(&self, id: ConnectionId) {
        if let Some(count) = self.peers.disconnect(id) {
            self.publish_connections(count);
        }
    }

    fn publish_connections(&self, count: usize) {
        let snapshot = self.peers.snapshot();
        self.bus.publish(NodeEvent::ConnectionCountChanged(count));
        self.bus.publish(NodeEvent::ConnectionsSnapshotChanged(snapshot));
    }

    pub fn record_traffic(&self, id: ConnectionId, recv: u64, sent: u64) {
        self.peers.record_traffic(id, recv, sent);
    }

    pub fn record_announced_work(&self, id: ConnectionId, work: U256) {
        self.peers.record_announced_work(id, work);
    }

    /// Visit every active-chain block from genesis up, `rescan_batch` blocks
    /// per lock acquisition. The visitor runs with no lock held, so a reorg
    /// between batches is possible. Returns the number of blocks visited.
    pub fn rescan(&self, mut visitor: impl FnMut(u64, &Block)) -> usize {
        let batch = self.rescan_batch.max(1);
        let mut next_height = 0u64;
        loop {
            let chunk: Vec<Block> = {
                let chain = self.chain.lock();
                chain
                    .active_range(next_height, batch)
                    .iter()
                    .map_while(|hash| chain.block(hash).cloned())
                    .collect()
            };
            for (offset, block) in chunk.iter().enumerate() {
                visitor(next_height + offset as u64, block);
            }
            next_height += chunk.len() as u64;
            if chunk.len() < batch {
                break;
            }
        }
        next_height as usize
    }

    /// Stop publishing events. Subscribers drain and then see the end.
    pub fn shutdown(&self) {
        info!("node shutting down");
        self.bus.shutdown();
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        self.chain.lock().snapshot()
    }

    /// Snapshot without waiting; `None` if the chain lock is busy.
    pub fn try_snapshot(&self) -> Option<ChainSnapshot> {
        self.chain.try_lock().map(|chain| chain.snapshot())
    }

    /// Announce the current height unless the chain lock is busy.
    pub(crate) fn try_announce_height(&self) -> bool {
        let Some(chain) = self.chain.try_lock() else {
            return false;
        };
        self.announce_height(chain.height());
        true
    }

    pub fn num_blocks(&self) -> u64 {
        self.chain.lock().height()
    }

    pub fn best_block_hash(&self) -> Hash {
        self.chain.lock().tip_hash()
    }

    pub fn block_hash(&self, height: u64) -> Option<Hash> {
        self.chain.lock().hash_at_height(height)
    }

    pub fn block_entry(&self, hash: &Hash) -> Option<BlockIndexEntry> {
        self.chain.lock().entry(hash).cloned()
    }

    pub fn block(&self, hash: &Hash) -> Option<Block> {
        self.chain.lock().block(hash).cloned()
    }

    pub fn is_on_active_chain(&self, hash: &Hash) -> bool {
        self.chain.lock().is_on_active_chain(hash)
    }

    pub fn peg_supply_index(&self) -> u32 {
        self.chain.lock().peg_state().supply_index
    }

    pub fn next_interval_peg_supply_index(&self) -> PegProjection {
        self.chain.lock().peg_state().next
    }

    pub fn next_next_interval_peg_supply_index(&self) -> PegProjection {
        self.chain.lock().peg_state().next_next()
    }

    pub fn peg_votes(&self) -> PegVotes {
        self.chain.lock().peg_state().votes
    }

    pub fn peg_start_block_num(&self) -> u64 {
        self.params.peg.start_height
    }

    pub fn last_block_date(&self) -> u64 {
        self.chain.lock().tip_entry().timestamp()
    }

    pub fn num_blocks_at_startup(&self) -> u64 {
        self.blocks_at_startup
    }

    pub fn client_startup_time(&self) -> u64 {
        self.started_at
    }

    pub fn is_importing(&self) -> bool {
        self.sync.is_importing()
    }

    pub fn in_initial_block_download(&self) -> bool {
        if self.sync.is_caught_up() {
            return false;
        }
        let snapshot = self.snapshot();
        let inputs = SyncInputs {
            tip_time: snapshot.tip_time,
            tip_work: snapshot.chain_work,
            best_header_work: snapshot.best_header_work,
            best_peer_work: self.peers.best_announced_work(),
            now: unix_now(),
        };
        self.sync.in_initial_block_download(&inputs)
    }

    pub fn connections(&self) -> Vec<NodeShortStat> {
        self.peers.snapshot()
    }

    pub fn num_connections(&self) -> usize {
        self.peers.count()
    }

    pub fn total_bytes_recv(&self) -> u64 {
        self.peers.total_bytes_recv()
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.peers.total_bytes_sent()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .active(unix_now())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Highest-priority active alert text, empty when there is none.
    pub fn status_bar_warnings(&self) -> String {
        self.alerts
            .read()
            .status_bar_warning(unix_now())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertPayload;
    use crate::config::Network;
    use crate::consensus::{compute_content_root, meets_target};
    use crate::crypto::{hash_bytes, PrivateKey};
    use crate::notify::EventKind;
    use crate::peg::PegVote;
    use crate::validation::Transaction;

    fn mine(parent: &BlockHeader, height: u64) -> Block {
        let txs = vec![Transaction::coinbase(height, 50, hash_bytes(b"node-test"))];
        let root = compute_content_root(PegVote::NoChange, &txs);
        let mut header = BlockHeader::new(1, parent.hash(), root, parent.timestamp + 60, 0x207fffff, 0);
        while !meets_target(&header) {
            header.nonce += 1;
        }
        Block::new(header, PegVote::NoChange, txs)
    }

    fn mine_chain(node: &Node, n: u64) -> Vec<Block> {
        let mut parent = genesis_block(node.params()).header;
        let mut blocks = Vec::new();
        for height in 1..=n {
            let block = mine(&parent, height);
            parent = block.header.clone();
            node.submit_block(block.clone()).unwrap();
            blocks.push(block);
        }
        blocks
    }

    fn regtest() -> Node {
        Node::open(&NodeConfig::for_network(Network::Regtest)).unwrap()
    }

    fn handshake(port: u16) -> PeerHandshake {
        PeerHandshake {
            addr: ([127, 0, 0, 1], port).into(),
            protocol_version: 70002,
            user_agent: "/test:0.1/".into(),
            start_height: 0,
        }
    }

    #[test]
    fn test_submit_announces_each_height_once() {
        let node = regtest();
        let mut sub = node.bus().subscribe_to(&[EventKind::BestHeight]);
        let blocks = mine_chain(&node, 2);

        assert_eq!(sub.try_recv().unwrap(), Some(NodeEvent::BestHeightChanged(1)));
        assert_eq!(sub.try_recv().unwrap(), Some(NodeEvent::BestHeightChanged(2)));

        assert!(node.submit_block(blocks[1].clone()).is_err());
        assert_eq!(sub.try_recv().unwrap(), None);
        assert_eq!(node.num_blocks(), 2);
        assert_eq!(node.best_block_hash(), blocks[1].hash());
        assert_eq!(node.block_hash(1), Some(blocks[0].hash()));
        assert_eq!(node.try_snapshot(), Some(node.snapshot()));
    }

    #[test]
    fn test_peer_events() {
        let node = regtest();
        let mut sub = node.subscribe();
        node.peer_connected(ConnectionId(1), handshake(1));
        node.peer_connected(ConnectionId(1), handshake(1));

        assert_eq!(sub.try_recv().unwrap(), Some(NodeEvent::ConnectionCountChanged(1)));
        assert!(matches!(
            sub.try_recv().unwrap(),
            Some(NodeEvent::ConnectionsSnapshotChanged(peers)) if peers.len() == 1
        ));
        assert_eq!(sub.try_recv().unwrap(), None);

        node.record_traffic(ConnectionId(1), 100, 40);
        node.peer_disconnected(ConnectionId(1));
        assert_eq!(sub.try_recv().unwrap(), Some(NodeEvent::ConnectionCountChanged(0)));
        assert_eq!(node.num_connections(), 0);
        assert_eq!((node.total_bytes_recv(), node.total_bytes_sent()), (100, 40));
    }

    #[test]
    fn test_duplicate_alert_notifies_once() {
        let key = PrivateKey::generate();
        let mut params = ChainParams::for_network(Network::Regtest);
        params.alert_keys = vec![key.public_key().to_hex()];
        let config = NodeConfig {
            params: Some(params),
            ..NodeConfig::for_network(Network::Regtest)
        };
        let node = Node::open(&config).unwrap();
        let mut sub = node.bus().subscribe_to(&[EventKind::Alert]);

        let payload = AlertPayload {
            version: 1,
            expiration: u64::MAX,
            cancels: vec![],
            priority: 10,
            status_bar: "upgrade required".into(),
            comment: String::new(),
        };
        let signed = SignedAlert::sign(&payload, &key).unwrap();
        node.receive_alert(&signed).unwrap();
        assert!(matches!(node.receive_alert(&signed), Err(AlertError::AlreadyKnown(_))));

        assert!(matches!(sub.try_recv().unwrap(), Some(NodeEvent::AlertChanged { .. })));
        assert_eq!(sub.try_recv().unwrap(), None);
        assert_eq!(node.status_bar_warnings(), "upgrade required");
        assert_eq!(node.active_alerts().len(), 1);
    }

    #[test]
    fn test_rescan_visits_active_chain_in_batches() {
        let config = NodeConfig {
            rescan_batch: 2,
            ..NodeConfig::for_network(Network::Regtest)
        };
        let node = Node::open(&config).unwrap();
        let blocks = mine_chain(&node, 5);

        let mut seen = Vec::new();
        let visited = node.rescan(|height, block| seen.push((height, block.hash())));
        assert_eq!(visited, 6);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[5], (5, blocks[4].hash()));
    }

    #[test]
    fn test_reopen_replays_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..NodeConfig::for_network(Network::Regtest)
        };
        let tip = {
            let node = Node::open(&config).unwrap();
            let blocks = mine_chain(&node, 3);
            blocks[2].hash()
        };

        let node = Node::open(&config).unwrap();
        assert_eq!(node.num_blocks(), 3);
        assert_eq!(node.num_blocks_at_startup(), 3);
        assert_eq!(node.best_block_hash(), tip);
        assert!(!node.is_importing());
    }

    #[test]
    fn test_reopen_keeps_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..NodeConfig::for_network(Network::Regtest)
        };
        let genesis = genesis_block(&ChainParams::for_network(Network::Regtest)).header;

        // Coinbase commits to the wrong height, so the body fails after its
        // header was accepted.
        let txs = vec![Transaction::coinbase(7, 50, hash_bytes(b"bad-height"))];
        let root = compute_content_root(PegVote::NoChange, &txs);
        let mut header = BlockHeader::new(1, genesis.hash(), root, genesis.timestamp + 60, 0x207fffff, 0);
        while !meets_target(&header) {
            header.nonce += 1;
        }
        let bad = Block::new(header, PegVote::NoChange, txs);
        let child = mine(&bad.header, 2);
        let reason = RejectReason::BadCoinbaseHeight { expected: 1, found: 7 };

        {
            let node = Node::open(&config).unwrap();
            node.submit_header(&bad.header).unwrap();
            node.submit_header(&child.header).unwrap();
            assert!(node.submit_block(bad.clone()).is_err());
            assert_eq!(node.block_entry(&child.hash()).unwrap().status, BlockStatus::Invalid);
        }

        let node = Node::open(&config).unwrap();
        for hash in [bad.hash(), child.hash()] {
            assert_eq!(node.block_entry(&hash).unwrap().status, BlockStatus::Invalid);
        }
        assert_eq!(node.snapshot().best_header_work, node.snapshot().chain_work);
        match node.submit_block(bad.clone()) {
            Err(NodeError::Chain(ChainError::ConsensusRejected { reason: found, .. })) => {
                assert_eq!(found, reason)
            }
            other => panic!("expected stored rejection, got {:?}", other),
        }
        assert!(node.submit_block(child).is_err());
        assert_eq!(node.num_blocks(), 0);
    }

    #[test]
    fn test_disconnect_then_reconsider() {
        let node = regtest();
        let blocks = mine_chain(&node, 3);
        let mut sub = node.bus().subscribe_to(&[EventKind::BestHeight]);

        node.disconnect_to(&blocks[0].hash()).unwrap();
        assert_eq!(node.num_blocks(), 1);
        assert_eq!(node.reconsider_best_tip().unwrap(), blocks[2].hash());

        assert_eq!(sub.try_recv().unwrap(), Some(NodeEvent::BestHeightChanged(1)));
        assert_eq!(sub.try_recv().unwrap(), Some(NodeEvent::BestHeightChanged(3)));
    }
}
