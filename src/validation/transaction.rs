//! Transaction structure
//!
//! UTXO-style transactions. Input unlocking data is opaque to the chain-state
//! engine; checking it is the job of the pluggable [`BlockVerifier`].
//!
//! [`BlockVerifier`]: crate::consensus::BlockVerifier

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, Hash};

/// Output index marking a coinbase input.
pub const COINBASE_INDEX: u32 = 0xFFFF_FFFF;

/// A transaction input referencing a previous output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    pub prev_tx_hash: Hash,
    pub output_index: u32,
    /// Unlocking data (signatures, scripts); not part of the transaction id
    pub witness: Vec<u8>,
}

/// A transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in base units
    pub amount: u64,
    /// Hash of the recipient's public key
    pub pubkey_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// For coinbases this carries the block height, keeping coinbase ids unique.
    pub lock_time: u64,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Block reward transaction for the block at `height`.
    pub fn coinbase(height: u64, reward: u64, recipient: Hash) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput {
                prev_tx_hash: Hash::zero(),
                output_index: COINBASE_INDEX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOutput {
                amount: reward,
                pubkey_hash: recipient,
            }],
            lock_time: height,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(
            self.inputs.as_slice(),
            [only] if only.prev_tx_hash.is_zero() && only.output_index == COINBASE_INDEX
        )
    }

    /// Height a coinbase commits to.
    pub fn coinbase_height(&self) -> Option<u64> {
        self.is_coinbase().then_some(self.lock_time)
    }

    /// Transaction id; witnesses are excluded.
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.id_bytes())
    }

    fn id_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.inputs.len() * 36 + self.outputs.len() * 40);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.prev_tx_hash.0);
            bytes.extend_from_slice(&input.output_index.to_le_bytes());
        }
        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.to_le_bytes());
            bytes.extend_from_slice(&output.pubkey_hash.0);
        }
        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }

    /// Sum of outputs, `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.amount))
    }
}
