//! Shared helpers for the integration tests: regtest parameters and a tiny
//! miner that grinds nonces against the regtest target.

#![allow(dead_code)]

use std::sync::Arc;

use peg_core::config::{ChainParams, Network, NodeConfig};
use peg_core::consensus::{compute_content_root, meets_target, Block, BlockHeader, BlockVerifier};
use peg_core::crypto::{hash_bytes, Hash};
use peg_core::node::{genesis_block, Node};
use peg_core::peg::PegVote;
use peg_core::validation::Transaction;

pub const REGTEST_BITS: u32 = 0x207f_ffff;

pub fn regtest_params(interval_length: u64) -> ChainParams {
    let mut params = ChainParams::for_network(Network::Regtest);
    params.peg.interval_length = interval_length;
    params
}

pub fn config_for(params: ChainParams) -> NodeConfig {
    NodeConfig {
        params: Some(params),
        ..NodeConfig::for_network(Network::Regtest)
    }
}

pub fn open_node(params: ChainParams) -> Node {
    Node::open(&config_for(params)).unwrap()
}

pub fn open_node_with(params: ChainParams, verifier: Arc<dyn BlockVerifier>) -> Node {
    Node::open_with_verifier(&config_for(params), verifier).unwrap()
}

pub fn genesis_header(params: &ChainParams) -> BlockHeader {
    genesis_block(params).header
}

/// Mine one block on `parent`. `tag` makes sibling blocks distinct.
pub fn mine(parent: &BlockHeader, height: u64, vote: PegVote, tag: &[u8]) -> Block {
    let txs = vec![Transaction::coinbase(height, 50, hash_bytes(tag))];
    let root = compute_content_root(vote, &txs);
    let mut header = BlockHeader::new(1, parent.hash(), root, parent.timestamp + 60, REGTEST_BITS, 0);
    while !meets_target(&header) {
        header.nonce += 1;
    }
    Block::new(header, vote, txs)
}

/// Mine a branch of `votes.len()` blocks on `parent` at `parent_height`.
pub fn mine_branch(parent: &BlockHeader, parent_height: u64, votes: &[PegVote], tag: &[u8]) -> Vec<Block> {
    let mut tip = parent.clone();
    let mut blocks = Vec::with_capacity(votes.len());
    for (offset, vote) in votes.iter().enumerate() {
        let block = mine(&tip, parent_height + 1 + offset as u64, *vote, tag);
        tip = block.header.clone();
        blocks.push(block);
    }
    blocks
}

pub fn nochange(n: usize) -> Vec<PegVote> {
    vec![PegVote::NoChange; n]
}

pub fn submit_all(node: &Node, blocks: &[Block]) {
    for block in blocks {
        node.submit_block(block.clone()).unwrap();
    }
}

/// Rejects exactly one block, as a failing script check would.
pub struct RejectBlock(pub Hash);

impl BlockVerifier for RejectBlock {
    fn verify_block(&self, block: &Block, _height: u64) -> Result<(), String> {
        if block.hash() == self.0 {
            Err("script check failed".into())
        } else {
            Ok(())
        }
    }
}
