//! Insertion history and the interval trees that replay it.

pub mod genome_tree;
pub mod insertion;

pub use genome_tree::GenomeTree;
pub use insertion::{Insertion, InsertionChain, InsertionId, FIRST_INSERTION};
