//! Transaction model

mod transaction;

pub use transaction::*;
