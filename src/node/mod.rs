//! Node module - the facade over chain state, peers, alerts and the bus

mod genesis;
mod handle;
mod poller;

pub use genesis::*;
pub use handle::*;
pub use poller::*;
