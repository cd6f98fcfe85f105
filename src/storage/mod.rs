//! Storage module - UTXO set and the on-disk block store

mod db;
mod utxo;

pub use db::*;
pub use utxo::*;
