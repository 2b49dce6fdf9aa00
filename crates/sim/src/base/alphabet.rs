use super::state::{SeqType, State, STATE_UNKNOWN};
use std::sync::Arc;

const DNA: [&str; 4] = ["A", "C", "G", "T"];
const PROTEIN: [&str; 20] = [
    "A", "R", "N", "D", "C", "Q", "E", "G", "H", "I", "L", "K", "M", "F", "P", "S", "T", "W",
    "Y", "V",
];
const BINARY: [&str; 2] = ["0", "1"];
const STOP_CODONS: [&str; 3] = ["TAA", "TAG", "TGA"];

/// Shared, immutable mapping from integer states to their text form.
///
/// The last entry renders the gap sentinel: `-` for single-column data and
/// `---` for codons. Clones share one table.
#[derive(Debug, Clone)]
pub struct StateMapping {
    symbols: Arc<[String]>,
    seq_type: SeqType,
}

impl StateMapping {
    /// Build the mapping for `seq_type`.
    pub fn new(seq_type: SeqType) -> Self {
        let mut symbols: Vec<String> = match seq_type {
            SeqType::Dna => DNA.iter().map(|s| s.to_string()).collect(),
            SeqType::Protein => PROTEIN.iter().map(|s| s.to_string()).collect(),
            SeqType::Binary => BINARY.iter().map(|s| s.to_string()).collect(),
            SeqType::Codon => sense_codons(),
        };
        symbols.push("-".repeat(seq_type.sites_per_state()));

        Self {
            symbols: symbols.into(),
            seq_type,
        }
    }

    /// Number of real states (excluding the gap entry).
    #[inline]
    pub fn num_states(&self) -> usize {
        self.symbols.len() - 1
    }

    #[inline]
    pub fn seq_type(&self) -> SeqType {
        self.seq_type
    }

    /// Text of `state`, or `None` if the code is outside the alphabet.
    pub fn symbol(&self, state: State) -> Option<&str> {
        if state == STATE_UNKNOWN {
            return self.symbols.last().map(String::as_str);
        }
        let idx = state as usize;
        if idx < self.num_states() {
            Some(self.symbols[idx].as_str())
        } else {
            None
        }
    }

    /// State for a text symbol; the gap text maps to the sentinel.
    pub fn state_of(&self, symbol: &str) -> Option<State> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|idx| {
                if idx == self.num_states() {
                    STATE_UNKNOWN
                } else {
                    idx as State
                }
            })
    }

    /// All symbols, the gap entry last.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Render a state vector. Unknown codes render as the gap text.
    pub fn render(&self, states: &[State]) -> String {
        let gap = self.gap_symbol();
        let mut out = String::with_capacity(states.len() * self.seq_type.sites_per_state());
        for &s in states {
            out.push_str(self.symbol(s).unwrap_or(gap));
        }
        out
    }

    /// Render `states`, copying `-` from `reference` wherever the reference
    /// row has a gap in the same column (any column of a codon triplet).
    ///
    /// Columns past the end of `reference` are rendered normally.
    pub fn render_with_gaps(&self, states: &[State], reference: &str) -> String {
        let width = self.seq_type.sites_per_state();
        let reference = reference.as_bytes();
        let gap = self.gap_symbol();
        let mut out = String::with_capacity(states.len() * width);

        for (i, &s) in states.iter().enumerate() {
            let cols = i * width..(i + 1) * width;
            match reference.get(cols) {
                Some(chunk) if chunk.contains(&b'-') => {
                    out.extend(chunk.iter().map(|&b| b as char));
                }
                _ => out.push_str(self.symbol(s).unwrap_or(gap)),
            }
        }
        out
    }

    fn gap_symbol(&self) -> &str {
        self.symbols.last().map(String::as_str).unwrap_or("-")
    }
}

impl PartialEq for StateMapping {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.symbols, &other.symbols) || self.symbols == other.symbols
    }
}

impl Eq for StateMapping {}

fn sense_codons() -> Vec<String> {
    let mut codons = Vec::with_capacity(61);
    for a in DNA {
        for b in DNA {
            for c in DNA {
                let codon = format!("{a}{b}{c}");
                if !STOP_CODONS.contains(&codon.as_str()) {
                    codons.push(codon);
                }
            }
        }
    }
    codons
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dna_mapping() {
        let map = StateMapping::new(SeqType::Dna);
        assert_eq!(map.num_states(), 4);
        assert_eq!(map.symbol(0), Some("A"));
        assert_eq!(map.symbol(3), Some("T"));
        assert_eq!(map.symbol(4), None);
        assert_eq!(map.symbol(STATE_UNKNOWN), Some("-"));
    }

    #[test]
    fn test_codon_gap_is_triplet() {
        let map = StateMapping::new(SeqType::Codon);
        assert_eq!(map.num_states(), 61);
        assert_eq!(map.symbol(STATE_UNKNOWN), Some("---"));
        assert_eq!(map.symbol(0), Some("AAA"));
        assert!(map.state_of("TAA").is_none());
        assert_eq!(map.state_of("---"), Some(STATE_UNKNOWN));
    }

    #[test]
    fn test_state_of_roundtrip() {
        let map = StateMapping::new(SeqType::Protein);
        for s in 0..20u16 {
            let sym = map.symbol(s).unwrap();
            assert_eq!(map.state_of(sym), Some(s));
        }
    }

    #[test]
    fn test_render() {
        let map = StateMapping::new(SeqType::Dna);
        assert_eq!(map.render(&[0, 1, STATE_UNKNOWN, 3]), "AC-T");
    }

    #[test]
    fn test_render_with_gaps_copies_reference() {
        let map = StateMapping::new(SeqType::Dna);
        assert_eq!(map.render_with_gaps(&[0, 1, 2, 3], "A-G"), "A-GT");

        let codon = StateMapping::new(SeqType::Codon);
        let aaa = codon.state_of("AAA").unwrap();
        assert_eq!(codon.render_with_gaps(&[aaa, aaa], "A-CAAA"), "A-CAAA");
        assert_eq!(codon.render_with_gaps(&[aaa, aaa], "CCCTTT"), "AAAAAA");
    }

    #[test]
    fn test_clone_is_cheap() {
        let a = StateMapping::new(SeqType::Binary);
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.symbols, &b.symbols));
        assert_eq!(a, b);
    }
}
