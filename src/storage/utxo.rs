//! UTXO set
//!
//! The committed set belongs to the active chain tip. Reorgs stage every
//! change in a [`UtxoView`] first and only fold it into the set once the whole
//! switch has succeeded, so a failed reorg leaves the set untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::validation::Transaction;

/// Key for UTXO lookup: (tx_hash, output_index)
pub type UTXOKey = (Hash, u32);

/// Unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTXO {
    pub amount: u64,
    pub pubkey_hash: Hash,
    /// Height of the block that created this output
    pub height: u64,
}

/// Outputs spent by one block, in spend order. Enough to undo the block exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub spent: Vec<(UTXOKey, UTXO)>,
}

/// Set of all unspent transaction outputs at the active tip
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UTXOSet {
    utxos: HashMap<UTXOKey, UTXO>,
}

impl UTXOSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tx_hash: &Hash, output_index: u32) -> bool {
        self.utxos.contains_key(&(*tx_hash, output_index))
    }

    pub fn get(&self, tx_hash: &Hash, output_index: u32) -> Option<&UTXO> {
        self.utxos.get(&(*tx_hash, output_index))
    }

    pub fn add(&mut self, tx_hash: Hash, output_index: u32, utxo: UTXO) {
        self.utxos.insert((tx_hash, output_index), utxo);
    }

    pub fn remove(&mut self, tx_hash: &Hash, output_index: u32) -> Option<UTXO> {
        self.utxos.remove(&(*tx_hash, output_index))
    }

    /// Add the outputs of a transaction without spending anything (genesis only).
    pub fn add_outputs(&mut self, tx: &Transaction, height: u64) {
        let tx_hash = tx.hash();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.add(
                tx_hash,
                index as u32,
                UTXO {
                    amount: output.amount,
                    pubkey_hash: output.pubkey_hash,
                    height,
                },
            );
        }
    }

    /// Fold staged changes into the set.
    pub fn apply_changes(&mut self, changes: HashMap<UTXOKey, Option<UTXO>>) {
        for (key, change) in changes {
            match change {
                Some(utxo) => {
                    self.utxos.insert(key, utxo);
                }
                None => {
                    self.utxos.remove(&key);
                }
            }
        }
    }

    /// Sum of all unspent amounts, saturating.
    pub fn total_value(&self) -> u64 {
        self.utxos
            .values()
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.amount))
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

/// Copy-on-write overlay over a [`UTXOSet`].
///
/// `None` in the change map marks an output spent in the overlay.
#[derive(Debug)]
pub struct UtxoView<'a> {
    base: &'a UTXOSet,
    changes: HashMap<UTXOKey, Option<UTXO>>,
}

impl<'a> UtxoView<'a> {
    pub fn new(base: &'a UTXOSet) -> Self {
        Self {
            base,
            changes: HashMap::new(),
        }
    }

    pub fn get(&self, key: &UTXOKey) -> Option<&UTXO> {
        match self.changes.get(key) {
            Some(change) => change.as_ref(),
            None => self.base.utxos.get(key),
        }
    }

    pub fn contains(&self, key: &UTXOKey) -> bool {
        self.get(key).is_some()
    }

    /// Spend an output, returning it if it was unspent.
    pub fn spend(&mut self, key: &UTXOKey) -> Option<UTXO> {
        let utxo = self.get(key).cloned()?;
        self.changes.insert(*key, None);
        Some(utxo)
    }

    pub fn add(&mut self, key: UTXOKey, utxo: UTXO) {
        self.changes.insert(key, Some(utxo));
    }

    /// Apply a transaction's effects; inputs must already have been checked.
    pub fn apply_transaction(&mut self, tx: &Transaction, height: u64, undo: &mut BlockUndo) {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let key = (input.prev_tx_hash, input.output_index);
                if let Some(spent) = self.spend(&key) {
                    undo.spent.push((key, spent));
                }
            }
        }

        let tx_hash = tx.hash();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.add(
                (tx_hash, index as u32),
                UTXO {
                    amount: output.amount,
                    pubkey_hash: output.pubkey_hash,
                    height,
                },
            );
        }
    }

    /// Undo a whole block. Fails if an output the block created is already gone,
    /// which means the view and the undo data disagree.
    pub fn revert_block(&mut self, transactions: &[Transaction], undo: &BlockUndo) -> Result<(), UTXOKey> {
        let mut spent = undo.spent.iter().rev();

        for tx in transactions.iter().rev() {
            let tx_hash = tx.hash();
            for index in 0..tx.outputs.len() as u32 {
                let key = (tx_hash, index);
                if self.spend(&key).is_none() {
                    return Err(key);
                }
            }

            if tx.is_coinbase() {
                continue;
            }
            for input in tx.inputs.iter().rev() {
                let key = (input.prev_tx_hash, input.output_index);
                match spent.next() {
                    Some((undo_key, utxo)) if *undo_key == key => self.add(key, utxo.clone()),
                    _ => return Err(key),
                }
            }
        }
        Ok(())
    }

    pub fn into_changes(self) -> HashMap<UTXOKey, Option<UTXO>> {
        self.changes
    }
}
