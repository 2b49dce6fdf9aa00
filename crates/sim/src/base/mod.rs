//! Base types for sequence representation.
//!
//! This module provides integer-coded states, the gap sentinel, sequence
//! types and the state-to-text mapping used by output writers.

mod alphabet;
mod sequence;
mod state;

pub use alphabet::StateMapping;
pub use sequence::Sequence;
pub use state::{is_gap, SeqType, State, STATE_UNKNOWN};
