//! Consensus module - block structure, proof-of-work and validation rules

mod block;
mod pow;
mod validation;

pub use block::*;
pub use pow::*;
pub use validation::*;
