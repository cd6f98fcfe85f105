//! Peg votes and per-interval tallies

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hash_tagged, Hash};

/// A block producer's vote on the money supply for the current interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PegVote {
    Inflate,
    Deflate,
    NoChange,
}

impl PegVote {
    pub fn as_str(&self) -> &'static str {
        match self {
            PegVote::Inflate => "inflate",
            PegVote::Deflate => "deflate",
            PegVote::NoChange => "nochange",
        }
    }

    fn tag_byte(&self) -> u8 {
        match self {
            PegVote::Inflate => 1,
            PegVote::Deflate => 2,
            PegVote::NoChange => 3,
        }
    }

    /// Merkle leaf binding the vote into the block's content commitment.
    pub fn commitment_leaf(&self) -> Hash {
        hash_tagged("peg-vote", &[self.tag_byte()])
    }
}

impl fmt::Display for PegVote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Votes counted so far in one interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PegVotes {
    pub inflate: u32,
    pub deflate: u32,
    pub nochange: u32,
}

impl PegVotes {
    pub fn total(&self) -> u32 {
        self.inflate + self.deflate + self.nochange
    }

    pub fn with(mut self, vote: PegVote) -> Self {
        match vote {
            PegVote::Inflate => self.inflate += 1,
            PegVote::Deflate => self.deflate += 1,
            PegVote::NoChange => self.nochange += 1,
        }
        self
    }

    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.inflate, self.deflate, self.nochange)
    }

    /// Option with strictly more votes than each of the other two.
    /// Any tie for first place yields `NoChange`.
    pub fn plurality(&self) -> PegVote {
        if self.inflate > self.deflate && self.inflate > self.nochange {
            PegVote::Inflate
        } else if self.deflate > self.inflate && self.deflate > self.nochange {
            PegVote::Deflate
        } else {
            PegVote::NoChange
        }
    }

    pub fn count(&self, vote: PegVote) -> u32 {
        match vote {
            PegVote::Inflate => self.inflate,
            PegVote::Deflate => self.deflate,
            PegVote::NoChange => self.nochange,
        }
    }
}
