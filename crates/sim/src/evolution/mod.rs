//! Evolutionary processes applied along the tree.
//!
//! - **Branch methods** ([`branch`]): one-step sampling from `P(t)` or a copy
//!   of the parent refined by the event loop.
//! - **Events** ([`events`]): insertions, deletions and rate-matrix
//!   substitutions as competing exponential clocks.
//! - **Indels** ([`indel`]): rates, block-size distributions and position
//!   selection.
//! - **Ancillary generators**: the root sequence ([`root`]), FunDi column
//!   permutation ([`fundi`]) and sequencing error on tips ([`error_model`]).

pub mod branch;
pub mod error_model;
pub mod events;
pub mod fundi;
pub mod indel;
pub mod root;

pub use branch::{sample_from_transition_matrix, select_method, switching_threshold, BranchSettings};
pub use events::{simulate_branch_events, EventCounts, EventState, EventTables, SimulationMethod};
pub use fundi::FunDiPermutation;
pub use indel::{select_valid_position, IndelDistribution, IndelModel};
pub use root::{RootFrequencies, StateFrequencies};
