//! P2P module - peer table, traffic counters and bootstrap seeds

mod peer;
mod seeds;

pub use peer::*;
pub use seeds::*;
