//! # Simulation Crate
//!
//! The `sim` crate simulates multiple sequence alignments along a rooted
//! phylogeny. A root sequence is drawn from the model's equilibrium
//! frequencies and evolved down every branch with substitutions and,
//! optionally, insertions and deletions. All tips end up aligned on a
//! common coordinate system.
//!
//! - [`model`]: substitution models and among-site rate heterogeneity.
//! - [`tree`]: the phylogeny the alignment is simulated along.
//! - [`evolution`]: per-branch processes.
//! - [`genome`]: insertion history and coordinate reconciliation.
//! - [`simulation`]: configuration, the traversal and output sinks.

pub mod base;
pub mod errors;
pub mod evolution;
pub mod genome;
pub mod model;
pub mod prelude;
pub mod sampling;
pub mod simulation;
pub mod tree;

pub use base::{Sequence, State};
