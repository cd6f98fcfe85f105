//! Alert module - signed network-wide notices

mod store;

pub use store::*;
