//! Final reconciliation of tips to the common coordinate system.
//!
//! A tip that finished while record `k` was the latest insertion lacks every
//! insertion after `k`. Tips are processed in chronological order of their
//! records with one tracked [`GenomeTree`]: it is built once from the first
//! record that has tips, then each later record only reveals its own runs.
//! Long chains of reveals leave the tree full of tiny runs, so it is rebuilt
//! from scratch every `rebuild_step` exported tips.

use crate::base::{Sequence, STATE_UNKNOWN};
use crate::genome::{GenomeTree, InsertionChain, InsertionId};
use crate::tree::NodeId;
use rayon::prelude::*;
use tracing::debug;

/// A finished tip waiting for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct TipSequence {
    pub node: NodeId,
    pub name: String,
    /// Latest insertion when the tip finished; `None` once reconciled.
    pub insertion: Option<InsertionId>,
    pub sequence: Sequence,
}

fn export_block(block: &mut [(usize, TipSequence)], tree: &GenomeTree, final_len: usize, parallel: bool) {
    let export = |(_, tip): &mut (usize, TipSequence)| {
        let states = tree.export(tip.sequence.as_slice(), final_len, STATE_UNKNOWN);
        tip.sequence = Sequence::from_states(states);
        tip.insertion = None;
    };
    if parallel {
        block.par_iter_mut().for_each(export);
    } else {
        block.iter_mut().for_each(export);
    }
}

/// Bring every tip carrying an insertion marker to `final_len` sites.
///
/// `tips` keeps its order. `rebuild_step` is the number of exported tips
/// between two rebuilds of the genome tree (0 rebuilds at every record).
pub fn update_new_genome_indels(
    chain: &mut InsertionChain,
    tips: &mut Vec<TipSequence>,
    final_len: usize,
    rebuild_step: usize,
    parallel: bool,
) {
    let records = chain.with_tips();
    let Some(&first) = records.first() else {
        return;
    };

    let mut indexed: Vec<(usize, TipSequence)> = std::mem::take(tips).into_iter().enumerate().collect();
    indexed.sort_by_key(|(i, tip)| (tip.insertion.unwrap_or(InsertionId::MAX), *i));

    // length of a sequence that existed right after `id`
    let length_after = |chain: &InsertionChain, id: InsertionId| final_len - chain.inserted_after(id);

    let mut cursor = 0;
    let mut block_of = |indexed: &[(usize, TipSequence)], id: InsertionId| {
        while cursor < indexed.len() && indexed[cursor].1.insertion.is_some_and(|k| k < id) {
            cursor += 1;
        }
        let start = cursor;
        while cursor < indexed.len() && indexed[cursor].1.insertion == Some(id) {
            cursor += 1;
        }
        start..cursor
    };

    let base_len = length_after(chain, first);
    let mut tree = GenomeTree::build_tracked(chain, first, base_len);
    let range = block_of(&indexed, first);
    let mut exported = range.len();
    export_block(&mut indexed[range], &tree, final_len, parallel);

    let mut threshold = rebuild_step;
    let mut previous = first;
    for &id in &records[1..] {
        if chain.next(id).is_none() {
            // nothing was inserted after the last record
            tree = GenomeTree::identity(final_len);
        } else if exported >= threshold {
            chain.clear_genome_nodes_from(id);
            tree = GenomeTree::build_tracked(chain, id, length_after(chain, id));
            threshold += rebuild_step;
            debug!(record = id, exported, "Rebuilt genome tree");
            previous = id;
        } else {
            tree.update(chain, previous, id);
            previous = id;
        }
        let range = block_of(&indexed, id);
        exported += range.len();
        export_block(&mut indexed[range], &tree, final_len, parallel);
    }

    indexed.sort_by_key(|(i, _)| *i);
    *tips = indexed.into_iter().map(|(_, tip)| tip).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::State;
    use crate::genome::{Insertion, FIRST_INSERTION};

    const GAP: State = STATE_UNKNOWN;

    fn tip(node: NodeId, insertion: InsertionId, states: Vec<State>) -> TipSequence {
        TipSequence {
            node,
            name: format!("t{node}"),
            insertion: Some(insertion),
            sequence: Sequence::from_states(states),
        }
    }

    /// Three insertions, with a tip finishing after each of them.
    fn scenario() -> (InsertionChain, Vec<TipSequence>) {
        let mut chain = InsertionChain::new();
        // base: 4 sites
        let a = chain.push(Insertion::new(2, 2, false)); // 6 sites
        let b = chain.push(Insertion::new(6, 1, true)); // 7 sites
        let c = chain.push(Insertion::new(0, 3, false)); // 10 sites
        let mut tips = vec![
            tip(1, FIRST_INSERTION, vec![0, 1, 2, 3]),
            tip(2, a, vec![0, 1, 9, 9, 2, 3]),
            tip(3, c, vec![7, 7, 7, 0, 1, 9, 9, 2, 3, 8]),
            tip(4, b, vec![0, 1, 9, 9, 2, 3, 8]),
            tip(5, a, vec![0, 1, 9, 9, GAP, 3]),
        ];
        for t in &tips {
            chain.register_tip(t.insertion.unwrap(), t.node);
        }
        tips.rotate_left(1);
        (chain, tips)
    }

    fn expected() -> Vec<Vec<State>> {
        vec![
            vec![GAP, GAP, GAP, 0, 1, 9, 9, 2, 3, GAP],
            vec![7, 7, 7, 0, 1, 9, 9, 2, 3, 8],
            vec![GAP, GAP, GAP, 0, 1, 9, 9, 2, 3, 8],
            vec![GAP, GAP, GAP, 0, 1, 9, 9, GAP, 3, GAP],
            vec![GAP, GAP, GAP, 0, 1, GAP, GAP, 2, 3, GAP],
        ]
    }

    #[test]
    fn test_incremental_reconciliation() {
        let (mut chain, mut tips) = scenario();
        update_new_genome_indels(&mut chain, &mut tips, 10, usize::MAX, false);
        let got: Vec<Vec<State>> = tips.iter().map(|t| t.sequence.as_slice().to_vec()).collect();
        assert_eq!(got, expected());
        assert!(tips.iter().all(|t| t.insertion.is_none()));
        assert_eq!(tips[0].node, 2);
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        for step in [0, 1, 2] {
            let (mut chain, mut tips) = scenario();
            update_new_genome_indels(&mut chain, &mut tips, 10, step, true);
            let got: Vec<Vec<State>> =
                tips.iter().map(|t| t.sequence.as_slice().to_vec()).collect();
            assert_eq!(got, expected(), "rebuild step {step}");
        }
    }

    #[test]
    fn test_no_insertions_is_noop() {
        let mut chain = InsertionChain::new();
        let mut tips = vec![TipSequence {
            node: 0,
            name: "a".into(),
            insertion: None,
            sequence: Sequence::from_states(vec![1, 2]),
        }];
        let before = tips.clone();
        update_new_genome_indels(&mut chain, &mut tips, 2, 1, false);
        assert_eq!(tips, before);
    }
}
