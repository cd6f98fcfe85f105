//! Notify module - typed event fan-out to UI, RPC and other consumers

mod bus;
mod events;

pub use bus::*;
pub use events::*;
