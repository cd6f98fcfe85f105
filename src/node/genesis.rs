//! Genesis block generation
//!
//! Each network's genesis block is a pure function of its `ChainParams`, so
//! every node on a network derives the byte-identical block.

use crate::config::ChainParams;
use crate::consensus::{compute_content_root, Block, BlockHeader};
use crate::crypto::{hash_tagged, Hash};
use crate::peg::PegVote;
use crate::validation::Transaction;

/// Genesis block version
const GENESIS_VERSION: u32 = 1;

/// Create the genesis block for a network.
///
/// Genesis is trusted as given; its proof of work is never checked.
pub fn genesis_block(params: &ChainParams) -> Block {
    let recipient = hash_tagged("genesis-recipient", params.network.name().as_bytes());
    let transactions = vec![Transaction::coinbase(0, params.block_subsidy, recipient)];
    let merkle_root = compute_content_root(PegVote::NoChange, &transactions);

    let header = BlockHeader::new(
        GENESIS_VERSION,
        Hash::zero(),
        merkle_root,
        params.genesis_timestamp,
        params.genesis_bits,
        0,
    );

    Block::new(header, PegVote::NoChange, transactions)
}

/// Genesis block summary, logged at startup
#[derive(Debug)]
pub struct GenesisInfo {
    pub hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub bits: u32,
}

impl GenesisInfo {
    pub fn new(params: &ChainParams) -> Self {
        let genesis = genesis_block(params);
        Self {
            hash: genesis.hash(),
            merkle_root: genesis.header.merkle_root,
            timestamp: genesis.header.timestamp,
            bits: genesis.header.bits,
        }
    }
}
