//! Chain module - block index, orphan pool and the active chain

mod index;
mod orphans;
mod state;

pub use index::*;
pub use orphans::*;
pub use state::*;
