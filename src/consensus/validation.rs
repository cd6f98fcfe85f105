//! Block and header validation
//!
//! Pure functions over decoded values plus a UTXO view. Nothing in here
//! touches the block index; `chain::ChainState` decides when to call what.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChainParams;
use crate::consensus::{compact_to_target, meets_target, Block, BlockHeader};
use crate::storage::{BlockUndo, UtxoView};

/// Number of ancestors whose median timestamp bounds a new header.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Why a header or block failed consensus validation
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("Invalid difficulty target")]
    InvalidTarget,
    #[error("Target above the network proof-of-work limit")]
    TargetAboveLimit,
    #[error("Invalid proof of work")]
    InvalidPoW,
    #[error("Timestamp not after median time past ({median})")]
    TimestampTooEarly { median: u64 },
    #[error("Ancestor is invalid")]
    InvalidAncestor,
    #[error("Block has no transactions")]
    Empty,
    #[error("First transaction is not a coinbase")]
    MissingCoinbase,
    #[error("More than one coinbase")]
    ExtraCoinbase,
    #[error("Coinbase commits to height {found}, expected {expected}")]
    BadCoinbaseHeight { expected: u64, found: u64 },
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Duplicate transaction")]
    DuplicateTransaction,
    #[error("Double spend detected")]
    DoubleSpend,
    #[error("Input spends a missing or already spent output")]
    MissingInput,
    #[error("Amount overflow")]
    ValueOverflow,
    #[error("Outputs exceed inputs")]
    OutputsExceedInputs,
    #[error("Coinbase pays {paid}, allowed {allowed}")]
    ExcessiveCoinbase { paid: u64, allowed: u64 },
    #[error("Script verification failed: {0}")]
    ScriptFailure(String),
}

/// Hook for the checks this crate does not implement itself (scripts,
/// signatures). Runs on every block being connected, before its
/// transactions are applied.
pub trait BlockVerifier: Send + Sync {
    fn verify_block(&self, block: &Block, height: u64) -> Result<(), String>;
}

/// Verifier that accepts every block. Used when script checks happen elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScriptChecks;

impl BlockVerifier for NoScriptChecks {
    fn verify_block(&self, _block: &Block, _height: u64) -> Result<(), String> {
        Ok(())
    }
}

/// Context-free header checks: a decodable target within the network limit,
/// met by the header's own hash.
pub fn check_header(header: &BlockHeader, params: &ChainParams) -> Result<(), RejectReason> {
    let target = compact_to_target(header.bits).ok_or(RejectReason::InvalidTarget)?;
    let limit = compact_to_target(params.pow_limit_bits).ok_or(RejectReason::InvalidTarget)?;
    if target > limit {
        return Err(RejectReason::TargetAboveLimit);
    }
    if !meets_target(header) {
        return Err(RejectReason::InvalidPoW);
    }
    Ok(())
}

/// Median of the given ancestor timestamps (most recent first, at most 11).
pub fn median_time_past(timestamps: &[u64]) -> u64 {
    if timestamps.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = timestamps.iter().take(MEDIAN_TIME_SPAN).copied().collect();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

pub fn check_timestamp(header: &BlockHeader, median: u64) -> Result<(), RejectReason> {
    if header.timestamp <= median {
        return Err(RejectReason::TimestampTooEarly { median });
    }
    Ok(())
}

/// Checks that only need the block and its height.
pub fn check_block(block: &Block, height: u64) -> Result<(), RejectReason> {
    let (coinbase, rest) = block
        .transactions
        .split_first()
        .ok_or(RejectReason::Empty)?;

    if !coinbase.is_coinbase() {
        return Err(RejectReason::MissingCoinbase);
    }
    if rest.iter().any(|tx| tx.is_coinbase()) {
        return Err(RejectReason::ExtraCoinbase);
    }
    let found = coinbase.lock_time;
    if found != height {
        return Err(RejectReason::BadCoinbaseHeight {
            expected: height,
            found,
        });
    }

    if block.compute_merkle_root() != block.header.merkle_root {
        return Err(RejectReason::InvalidMerkleRoot);
    }

    let mut txids = HashSet::with_capacity(block.transactions.len());
    if !block.transactions.iter().all(|tx| txids.insert(tx.hash())) {
        return Err(RejectReason::DuplicateTransaction);
    }

    let mut spent = HashSet::new();
    for input in rest.iter().flat_map(|tx| tx.inputs.iter()) {
        if !spent.insert((input.prev_tx_hash, input.output_index)) {
            return Err(RejectReason::DoubleSpend);
        }
    }

    Ok(())
}

/// Check every transaction against the view and apply it. On error the view
/// is left partially updated; callers discard it.
pub fn connect_transactions(
    block: &Block,
    height: u64,
    view: &mut UtxoView<'_>,
    params: &ChainParams,
) -> Result<BlockUndo, RejectReason> {
    let (coinbase, rest) = block.transactions.split_first().ok_or(RejectReason::Empty)?;
    let mut undo = BlockUndo::default();
    let mut fees: u64 = 0;

    for tx in rest {
        let mut input_value: u64 = 0;
        for input in &tx.inputs {
            let utxo = view
                .get(&(input.prev_tx_hash, input.output_index))
                .ok_or(RejectReason::MissingInput)?;
            input_value = input_value
                .checked_add(utxo.amount)
                .ok_or(RejectReason::ValueOverflow)?;
        }

        let output_value = tx.total_output_value().ok_or(RejectReason::ValueOverflow)?;
        let fee = input_value
            .checked_sub(output_value)
            .ok_or(RejectReason::OutputsExceedInputs)?;
        fees = fees.checked_add(fee).ok_or(RejectReason::ValueOverflow)?;

        view.apply_transaction(tx, height, &mut undo);
    }

    let paid = coinbase.total_output_value().ok_or(RejectReason::ValueOverflow)?;
    let allowed = params.block_subsidy.saturating_add(fees);
    if paid > allowed {
        return Err(RejectReason::ExcessiveCoinbase { paid, allowed });
    }
    view.apply_transaction(coinbase, height, &mut undo);

    Ok(undo)
}
