//! Database persistence layer using Sled
//!
//! Four trees: block bodies keyed by hash, block-index entries keyed by hash,
//! rejection reasons keyed by hash, and chain metadata (the active tip).
//! Values are bincode.

use std::collections::HashMap;
use std::path::Path;

use sled::{Db, Tree};
use thiserror::Error;
use tracing::debug;

use crate::chain::BlockIndexEntry;
use crate::consensus::{Block, RejectReason};
use crate::crypto::Hash;

const TIP_KEY: &str = "tip_hash";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Corrupt record under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Sled-backed store for blocks, index entries and the tip
#[derive(Debug, Clone)]
pub struct BlockStore {
    db: Db,
    blocks_tree: Tree,
    entries_tree: Tree,
    failures_tree: Tree,
    metadata_tree: Tree,
}

impl BlockStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway database that is deleted on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let blocks_tree = db.open_tree("blocks")?;
        let entries_tree = db.open_tree("entries")?;
        let failures_tree = db.open_tree("failures")?;
        let metadata_tree = db.open_tree("meta")?;
        Ok(Self {
            db,
            blocks_tree,
            entries_tree,
            failures_tree,
            metadata_tree,
        })
    }

    /// Save a block body and wait until it is durable
    pub fn save_block(&self, block: &Block) -> Result<(), StoreError> {
        let value = bincode::serialize(block)?;
        self.blocks_tree.insert(block.hash().0, value)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.blocks_tree.get(hash.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks_tree.contains_key(hash.0)?)
    }

    /// Write changed index entries, the reasons of newly invalid ones, and
    /// the tip if it moved, in one flush.
    pub fn save_index(
        &self,
        entries: &[BlockIndexEntry],
        failures: &[(Hash, RejectReason)],
        tip: Option<&Hash>,
    ) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for entry in entries {
            batch.insert(&entry.hash.0[..], bincode::serialize(entry)?);
        }
        self.entries_tree.apply_batch(batch)?;
        let mut batch = sled::Batch::default();
        for (hash, reason) in failures {
            batch.insert(&hash.0[..], bincode::serialize(reason)?);
        }
        self.failures_tree.apply_batch(batch)?;
        if let Some(tip) = tip {
            self.metadata_tree.insert(TIP_KEY, &tip.0[..])?;
        }
        self.db.flush()?;
        debug!(entries = entries.len(), failures = failures.len(), tip_moved = tip.is_some(), "index flushed");
        Ok(())
    }

    /// All stored entries, in the order their headers were first seen.
    pub fn load_entries(&self) -> Result<Vec<BlockIndexEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in self.entries_tree.iter() {
            let (_, value) = item?;
            entries.push(bincode::deserialize::<BlockIndexEntry>(&value)?);
        }
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries)
    }

    /// Stored rejection reasons by block hash.
    pub fn load_failures(&self) -> Result<HashMap<Hash, RejectReason>, StoreError> {
        let mut failures = HashMap::new();
        for item in self.failures_tree.iter() {
            let (key, value) = item?;
            let hash = Hash::from_slice(&key).ok_or_else(|| StoreError::Corrupt {
                key: hex::encode(&key),
                reason: "failure key is not a block hash".into(),
            })?;
            failures.insert(hash, bincode::deserialize(&value)?);
        }
        Ok(failures)
    }

    pub fn load_tip(&self) -> Result<Option<Hash>, StoreError> {
        let Some(bytes) = self.metadata_tree.get(TIP_KEY)? else {
            return Ok(None);
        };
        Hash::from_slice(&bytes)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt {
                key: TIP_KEY.into(),
                reason: format!("expected 32 bytes, found {}", bytes.len()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockStatus;
    use crate::config::{ChainParams, Network};
    use crate::consensus::block_work;
    use crate::node::genesis_block;

    fn entry_for(block: &Block, seq: u64) -> BlockIndexEntry {
        BlockIndexEntry {
            hash: block.hash(),
            header: block.header.clone(),
            height: 0,
            chain_work: block_work(block.header.bits),
            seq,
            status: BlockStatus::Validated,
            has_data: true,
            chain_data: true,
            peg: None,
        }
    }

    #[test]
    fn test_block_roundtrip() {
        let store = BlockStore::temporary().unwrap();
        let genesis = genesis_block(&ChainParams::for_network(Network::Regtest));
        assert!(!store.has_block(&genesis.hash()).unwrap());
        store.save_block(&genesis).unwrap();
        assert_eq!(store.get_block(&genesis.hash()).unwrap(), Some(genesis));
    }

    #[test]
    fn test_entries_load_in_seq_order() {
        let store = BlockStore::temporary().unwrap();
        let a = genesis_block(&ChainParams::for_network(Network::Regtest));
        let b = genesis_block(&ChainParams::for_network(Network::Test));
        store
            .save_index(&[entry_for(&a, 5), entry_for(&b, 2)], &[], Some(&a.hash()))
            .unwrap();

        let loaded = store.load_entries().unwrap();
        assert_eq!(loaded.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(store.load_tip().unwrap(), Some(a.hash()));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis_block(&ChainParams::for_network(Network::Regtest));
        {
            let store = BlockStore::open(dir.path()).unwrap();
            store.save_block(&genesis).unwrap();
            store.save_index(&[entry_for(&genesis, 0)], &[], Some(&genesis.hash())).unwrap();
        }
        let store = BlockStore::open(dir.path()).unwrap();
        assert!(store.has_block(&genesis.hash()).unwrap());
        assert_eq!(store.load_entries().unwrap().len(), 1);
        assert_eq!(store.load_tip().unwrap(), Some(genesis.hash()));
    }

    #[test]
    fn test_failures_reload() {
        let store = BlockStore::temporary().unwrap();
        let block = genesis_block(&ChainParams::for_network(Network::Regtest));
        let mut entry = entry_for(&block, 1);
        entry.status = BlockStatus::Invalid;
        let reason = RejectReason::BadCoinbaseHeight { expected: 1, found: 7 };
        store
            .save_index(&[entry], &[(block.hash(), reason.clone())], None)
            .unwrap();

        let failures = store.load_failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures.get(&block.hash()), Some(&reason));
        assert_eq!(store.load_tip().unwrap(), None);
    }
}
