//! Merkle commitment over block contents
//!
//! Odd levels duplicate their last element, so the root of `[a, b, c]`
//! equals the root of `[a, b, c, c]`. Blocks reject duplicated transactions
//! separately; the commitment alone does not.

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of leaf hashes. Empty input yields the zero hash.
pub fn compute_merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::zero();
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [single] => hash_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone)]
pub struct MerkleProof {
    pub index: usize,
    /// Sibling hashes from leaf to root, flagged `true` when the sibling sits on the left.
    pub siblings: Vec<(Hash, bool)>,
}

impl MerkleProof {
    pub fn verify(&self, leaf: &Hash, root: &Hash) -> bool {
        let folded = self.siblings.iter().fold(*leaf, |acc, (sibling, is_left)| {
            if *is_left {
                hash_pair(sibling, &acc)
            } else {
                hash_pair(&acc, sibling)
            }
        });
        folded == *root
    }
}

pub fn build_merkle_proof(leaves: &[Hash], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    let mut position = index;
    let mut siblings = Vec::new();

    while level.len() > 1 {
        let sibling = if position % 2 == 0 {
            level.get(position + 1).copied().unwrap_or(level[position])
        } else {
            level[position - 1]
        };
        siblings.push((sibling, position % 2 == 1));
        level = next_level(&level);
        position /= 2;
    }

    Some(MerkleProof { index, siblings })
}
