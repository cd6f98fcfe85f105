//! Block structure
//!
//! Headers and blocks are immutable values once decoded. Decoding only checks
//! structure; consensus rules live in `validation`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{compute_merkle_root, hash_bytes, Hash};
use crate::peg::PegVote;
use crate::validation::Transaction;

/// Serialized header length: version, prev hash, merkle root, timestamp, bits, nonce.
pub const HEADER_SIZE: usize = 4 + 32 + 32 + 8 + 4 + 8;

/// Structural decoding failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Malformed block: {0}")]
    MalformedBlock(String),
}

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Commitment to the block's transactions and peg vote
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Difficulty target (compact representation)
    pub bits: u32,
    /// Nonce used for PoW
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_hash: Hash,
        merkle_root: Hash,
        timestamp: u64,
        bits: u32,
        nonce: u64,
    ) -> Self {
        Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Fixed-layout little-endian serialization; the block hash commits to exactly these bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Decode the fixed layout produced by [`BlockHeader::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != HEADER_SIZE {
            return Err(DecodeError::MalformedHeader(format!(
                "expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut reader = FieldReader { bytes, offset: 0 };
        Ok(Self {
            version: u32::from_le_bytes(reader.take()),
            prev_hash: Hash(reader.take()),
            merkle_root: Hash(reader.take()),
            timestamp: u64::from_le_bytes(reader.take()),
            bits: u32::from_le_bytes(reader.take()),
            nonce: u64::from_le_bytes(reader.take()),
        })
    }

    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl FieldReader<'_> {
    // Callers check the total length up front.
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }
}

/// Loosely-typed header as handed over by a decoder that works field by field
/// (JSON, RPC, a foreign wire format). Converting it into a [`BlockHeader`]
/// is where missing fields and wrong digest lengths are caught.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub version: Option<u32>,
    pub prev_hash: Option<Vec<u8>>,
    pub merkle_root: Option<Vec<u8>>,
    pub timestamp: Option<u64>,
    pub bits: Option<u32>,
    pub nonce: Option<u64>,
}

impl TryFrom<HeaderRecord> for BlockHeader {
    type Error = DecodeError;

    fn try_from(record: HeaderRecord) -> Result<Self, Self::Error> {
        fn required<T>(field: Option<T>, name: &str) -> Result<T, DecodeError> {
            field.ok_or_else(|| DecodeError::MalformedHeader(format!("missing field `{}`", name)))
        }

        fn digest(bytes: Vec<u8>, name: &str) -> Result<Hash, DecodeError> {
            Hash::from_slice(&bytes).ok_or_else(|| {
                DecodeError::MalformedHeader(format!(
                    "`{}` must be 32 bytes, got {}",
                    name,
                    bytes.len()
                ))
            })
        }

        Ok(BlockHeader {
            version: required(record.version, "version")?,
            prev_hash: digest(required(record.prev_hash, "prev_hash")?, "prev_hash")?,
            merkle_root: digest(required(record.merkle_root, "merkle_root")?, "merkle_root")?,
            timestamp: required(record.timestamp, "timestamp")?,
            bits: required(record.bits, "bits")?,
            nonce: required(record.nonce, "nonce")?,
        })
    }
}

impl From<&BlockHeader> for HeaderRecord {
    fn from(header: &BlockHeader) -> Self {
        HeaderRecord {
            version: Some(header.version),
            prev_hash: Some(header.prev_hash.0.to_vec()),
            merkle_root: Some(header.merkle_root.0.to_vec()),
            timestamp: Some(header.timestamp),
            bits: Some(header.bits),
            nonce: Some(header.nonce),
        }
    }
}

/// A complete block: header, the miner's peg vote and the transactions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// Vote cast by the block's producer for the current peg interval
    pub peg_vote: PegVote,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, peg_vote: PegVote, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            peg_vote,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.header.is_genesis()
    }

    /// Merkle commitment over the transaction ids followed by the peg vote leaf.
    pub fn compute_merkle_root(&self) -> Hash {
        compute_content_root(self.peg_vote, &self.transactions)
    }
}

/// Commitment a header must carry for the given block contents.
pub fn compute_content_root(peg_vote: PegVote, transactions: &[Transaction]) -> Hash {
    let mut leaves: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    leaves.push(peg_vote.commitment_leaf());
    compute_merkle_root(&leaves)
}
