//! Schema module - Program trees, search configuration and result types.

mod search;
mod tree;

pub use search::*;
pub use tree::*;
