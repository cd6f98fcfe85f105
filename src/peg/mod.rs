//! Peg supply engine - miner votes and the supply index they drive

mod engine;
mod vote;

pub use engine::*;
pub use vote::*;
