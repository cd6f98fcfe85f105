//! Peg Core Library
//!
//! Chain-state engine for a proof-of-work chain whose money supply follows a
//! peg index voted on by block producers: block index and fork choice, peg
//! voting, signed alerts, and a node facade that publishes typed events.

pub mod alert;
pub mod chain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod node;
pub mod notify;
pub mod p2p;
pub mod peg;
pub mod rpc;
pub mod storage;
pub mod sync;
pub mod validation;

/// Client identity constants
pub mod constants {
    /// Client version reported in logs and over RPC
    pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
}
