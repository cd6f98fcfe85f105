//! Cryptography module - BLAKE3 hashing, Schnorr alert signatures, merkle commitments

mod hash;
mod merkle;
mod schnorr;

pub use hash::*;
pub use merkle::*;
pub use schnorr::*;
