//! Integer-coded character states and sequence types.

use serde::{Deserialize, Serialize};

/// Integer code of a character state.
pub type State = u16;

/// Sentinel state for a site that carries no data in a lineage: either the
/// site was deleted, or it was inserted on a branch the lineage never saw.
pub const STATE_UNKNOWN: State = State::MAX;

/// Sense codons of the standard genetic code, in `ACGT` lexicographic order.
const SENSE_CODONS: usize = 61;

/// Kind of character data being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeqType {
    #[default]
    Dna,
    Protein,
    Binary,
    Codon,
}

impl SeqType {
    /// Number of distinct (non-sentinel) states.
    pub fn num_states(self) -> usize {
        match self {
            SeqType::Dna => 4,
            SeqType::Protein => 20,
            SeqType::Binary => 2,
            SeqType::Codon => SENSE_CODONS,
        }
    }

    /// Number of alignment columns one state occupies.
    pub fn sites_per_state(self) -> usize {
        match self {
            SeqType::Codon => 3,
            _ => 1,
        }
    }

    /// Whether sequencing error models apply to this data type.
    pub fn is_nucleotide(self) -> bool {
        matches!(self, SeqType::Dna)
    }
}

/// `true` if `state` is the gap sentinel.
#[inline(always)]
pub fn is_gap(state: State) -> bool {
    state == STATE_UNKNOWN
}
