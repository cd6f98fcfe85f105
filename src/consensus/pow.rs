//! Compact difficulty targets and proof-of-work accounting
//!
//! `bits` uses the usual compact encoding: one exponent byte followed by a
//! 23-bit mantissa and a sign bit. Negative, zero and overflowing encodings
//! are invalid targets.

use primitive_types::U256;

use crate::consensus::BlockHeader;
use crate::crypto::Hash;

/// Cumulative proof-of-work is a 256-bit integer.
pub type Work = U256;

/// Decode a compact target. Returns `None` for negative, zero or overflowing encodings.
pub fn compact_to_target(bits: u32) -> Option<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    let negative = bits & 0x0080_0000 != 0;

    if mantissa == 0 || negative {
        return None;
    }

    let overflow = exponent > 34
        || (mantissa > 0xff && exponent > 33)
        || (mantissa > 0xffff && exponent > 32);
    if overflow {
        return None;
    }

    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3) as usize)
    };

    if target.is_zero() {
        None
    } else {
        Some(target)
    }
}

/// Encode a target in compact form, rounding down to 23 bits of precision.
pub fn target_to_compact(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = (target.bits() as u32 + 7) / 8;
    let mut mantissa = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3) as usize)).low_u64() as u32
    };

    // Keep the sign bit clear by shifting one byte into the exponent.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }

    (size << 24) | (mantissa & 0x007f_ffff)
}

/// Interpret a hash as a big-endian 256-bit integer.
pub fn hash_to_u256(hash: &Hash) -> U256 {
    U256::from_big_endian(&hash.0)
}

/// Work represented by a single block: `floor(2^256 / (target + 1))`.
///
/// Computed as `(!target / (target + 1)) + 1` so it never leaves 256 bits.
/// Invalid targets contribute no work.
pub fn block_work(bits: u32) -> Work {
    match compact_to_target(bits) {
        Some(target) => (!target / (target + U256::one())) + U256::one(),
        None => U256::zero(),
    }
}

/// Whether the header hash satisfies its own target.
pub fn meets_target(header: &BlockHeader) -> bool {
    match compact_to_target(header.bits) {
        Some(target) => hash_to_u256(&header.hash()) <= target,
        None => false,
    }
}
