//! Interval tree mapping a lineage's sites onto the common coordinates.
//!
//! Leaves are half-open runs of sites laid out left to right: either real
//! content of the lineage being exported, or a block inserted by a later
//! insertion that the lineage never saw (a gap run). Internal nodes store
//! the summed length of their subtree, so locating an absolute position is
//! a walk from the root.
//!
//! Trees are built by replaying insertion records in chronological order.
//! Descent and export are iterative; a long run of appends makes the tree
//! deep but never recursive.

use super::insertion::{InsertionChain, InsertionId};
use crate::base::State;

type GenomeNodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenomeNode {
    Leaf {
        len: usize,
        is_gap: bool,
        /// Insertion that created this run; `None` for base content.
        origin: Option<InsertionId>,
    },
    Branch {
        left: GenomeNodeId,
        right: GenomeNodeId,
        len: usize,
    },
}

impl GenomeNode {
    #[inline]
    fn len(&self) -> usize {
        match *self {
            GenomeNode::Leaf { len, .. } | GenomeNode::Branch { len, .. } => len,
        }
    }
}

/// Interval tree describing where the sites of one lineage land after a
/// series of insertions.
#[derive(Debug, Clone)]
pub struct GenomeTree {
    nodes: Vec<GenomeNode>,
    root: GenomeNodeId,
}

impl GenomeTree {
    /// A single run of `len` real sites: export is the identity.
    pub fn identity(len: usize) -> Self {
        Self {
            nodes: vec![GenomeNode::Leaf {
                len,
                is_gap: false,
                origin: None,
            }],
            root: 0,
        }
    }

    /// Replay every insertion after `from` on top of `base_len` real sites.
    ///
    /// Inserted runs are gaps: the result maps a sequence that existed right
    /// after `from` onto the coordinates after the latest insertion.
    pub fn build(chain: &InsertionChain, from: InsertionId, base_len: usize) -> Self {
        let mut tree = Self::identity(base_len);
        for (id, ins) in chain.after(from) {
            tree.insert(id, ins.position, ins.length, ins.at_end, None);
        }
        tree
    }

    /// Like [`GenomeTree::build`], but every gap run is registered in its
    /// insertion's `genome_nodes` so that [`GenomeTree::update`] can later
    /// reveal it.
    pub fn build_tracked(chain: &mut InsertionChain, from: InsertionId, base_len: usize) -> Self {
        let mut tree = Self::identity(base_len);
        let mut id = from;
        while let Some(next) = chain.next(id) {
            let (position, length, at_end) = {
                let ins = chain.get(next);
                (ins.position, ins.length, ins.at_end)
            };
            tree.insert(next, position, length, at_end, Some(&mut *chain));
            id = next;
        }
        tree
    }

    /// Total number of sites covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes[self.root].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reveal the runs of every insertion in `(previous, newest]`.
    ///
    /// Afterwards the tree maps sequences that existed right after `newest`.
    /// Only runs registered by [`GenomeTree::build_tracked`] are affected.
    pub fn update(&mut self, chain: &InsertionChain, previous: InsertionId, newest: InsertionId) {
        for id in (previous + 1)..=newest.min(chain.latest()) {
            for &node in &chain.get(id).genome_nodes {
                if let Some(GenomeNode::Leaf { is_gap, .. }) = self.nodes.get_mut(node) {
                    *is_gap = false;
                }
            }
        }
    }

    /// Map `original` onto the common coordinates.
    ///
    /// Real runs consume `original` left to right (the sentinel once it is
    /// exhausted); gap runs emit `gap`. The result is padded with `gap` or
    /// truncated to exactly `target_len`.
    pub fn export(&self, original: &[State], target_len: usize, gap: State) -> Vec<State> {
        let mut out = Vec::with_capacity(target_len);
        let mut cursor = 0;
        let mut stack = vec![self.root];

        while let Some(idx) = stack.pop() {
            if out.len() >= target_len {
                break;
            }
            match self.nodes[idx] {
                GenomeNode::Branch { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                GenomeNode::Leaf { len, is_gap: true, .. } => {
                    out.extend(std::iter::repeat(gap).take(len));
                }
                GenomeNode::Leaf { len, .. } => {
                    let end = (cursor + len).min(original.len());
                    let copied = end.saturating_sub(cursor);
                    out.extend_from_slice(&original[cursor.min(end)..end]);
                    out.extend(std::iter::repeat(gap).take(len - copied));
                    cursor += len;
                }
            }
        }
        out.resize(target_len, gap);
        out
    }

    /// Split the run containing `position` and place a gap run of `length`
    /// sites so that it starts at `position`.
    fn insert(
        &mut self,
        id: InsertionId,
        position: usize,
        length: usize,
        at_end: bool,
        mut chain: Option<&mut InsertionChain>,
    ) {
        let mut path = Vec::new();
        let mut node = self.root;
        let mut offset = if at_end { self.len() } else { position.min(self.len()) };

        while let GenomeNode::Branch { left, right, .. } = self.nodes[node] {
            path.push(node);
            let left_len = self.nodes[left].len();
            if offset < left_len {
                node = left;
            } else {
                offset -= left_len;
                node = right;
            }
        }

        let GenomeNode::Leaf {
            len,
            is_gap,
            origin,
        } = self.nodes[node]
        else {
            return;
        };

        let gap_leaf = self.push(GenomeNode::Leaf {
            len: length,
            is_gap: true,
            origin: Some(id),
        });
        let piece = |len| GenomeNode::Leaf {
            len,
            is_gap,
            origin,
        };

        let replaced: Vec<GenomeNodeId>;
        let branch = if offset == 0 {
            let rest = self.push(piece(len));
            replaced = vec![rest];
            GenomeNode::Branch {
                left: gap_leaf,
                right: rest,
                len: len + length,
            }
        } else if offset >= len {
            let head = self.push(piece(len));
            replaced = vec![head];
            GenomeNode::Branch {
                left: head,
                right: gap_leaf,
                len: len + length,
            }
        } else {
            let head = self.push(piece(offset));
            let tail = self.push(piece(len - offset));
            replaced = vec![head, tail];
            let inner = self.push(GenomeNode::Branch {
                left: gap_leaf,
                right: tail,
                len: length + len - offset,
            });
            GenomeNode::Branch {
                left: head,
                right: inner,
                len: len + length,
            }
        };
        self.nodes[node] = branch;

        for &ancestor in &path {
            if let GenomeNode::Branch { len, .. } = &mut self.nodes[ancestor] {
                *len += length;
            }
        }

        if let Some(chain) = chain.as_deref_mut() {
            chain.get_mut(id).genome_nodes.push(gap_leaf);
            if let (true, Some(owner)) = (is_gap, origin) {
                let nodes = &mut chain.get_mut(owner).genome_nodes;
                nodes.retain(|&n| n != node);
                nodes.extend(replaced);
            }
        }
    }

    fn push(&mut self, node: GenomeNode) -> GenomeNodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::STATE_UNKNOWN;
    use crate::genome::insertion::{Insertion, FIRST_INSERTION};

    const G: State = STATE_UNKNOWN;

    #[test]
    fn test_no_insertions_is_identity() {
        let chain = InsertionChain::new();
        let tree = GenomeTree::build(&chain, FIRST_INSERTION, 6);
        let seq = vec![0, 1, 2, 3, G, 1];
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.export(&seq, 6, G), seq);
    }

    #[test]
    fn test_single_insertion_lacking_lineage() {
        let mut chain = InsertionChain::new();
        chain.push(Insertion::new(2, 3, false));
        let tree = GenomeTree::build(&chain, FIRST_INSERTION, 5);
        assert_eq!(tree.len(), 8);
        let out = tree.export(&[0, 1, 2, 3, 0], 8, G);
        assert_eq!(out, vec![0, 1, G, G, G, 2, 3, 0]);
    }

    #[test]
    fn test_single_insertion_holding_lineage() {
        let mut chain = InsertionChain::new();
        let id = chain.push(Insertion::new(2, 3, false));
        let mut tree = GenomeTree::build_tracked(&mut chain, FIRST_INSERTION, 5);
        tree.update(&chain, FIRST_INSERTION, id);
        let evolved = vec![0, 1, 3, 3, 3, 2, 3, 0];
        assert_eq!(tree.export(&evolved, 8, G), evolved);
    }

    #[test]
    fn test_insert_at_start_and_end() {
        let mut chain = InsertionChain::new();
        chain.push(Insertion::new(0, 1, false));
        chain.push(Insertion::new(4, 2, true));
        let tree = GenomeTree::build(&chain, FIRST_INSERTION, 3);
        assert_eq!(tree.export(&[1, 2, 3], 6, G), vec![G, 1, 2, 3, G, G]);
    }

    #[test]
    fn test_insertion_inside_earlier_insertion() {
        let mut chain = InsertionChain::new();
        // [a b] -> [a X X X b] -> [a X Y X X b]
        let first = chain.push(Insertion::new(1, 3, false));
        let second = chain.push(Insertion::new(2, 1, false));
        let mut tree = GenomeTree::build_tracked(&mut chain, FIRST_INSERTION, 2);
        assert_eq!(tree.export(&[0, 1], 6, G), vec![0, G, G, G, G, 1]);
        // the split gap run is still owned by the first insertion
        assert_eq!(chain.get(first).genome_nodes.len(), 2);

        tree.update(&chain, FIRST_INSERTION, first);
        assert_eq!(tree.export(&[0, 2, 2, 2, 1], 6, G), vec![0, 2, G, 2, 2, 1]);

        tree.update(&chain, first, second);
        let full = vec![0, 2, 3, 2, 2, 1];
        assert_eq!(tree.export(&full, 6, G), full);
    }

    #[test]
    fn test_build_from_later_record() {
        let mut chain = InsertionChain::new();
        let first = chain.push(Insertion::new(0, 2, false));
        chain.push(Insertion::new(5, 1, true));
        // a lineage that already holds the first insertion (length 5)
        let tree = GenomeTree::build(&chain, first, 5);
        assert_eq!(tree.export(&[1, 1, 0, 0, 0], 6, G), vec![1, 1, 0, 0, 0, G]);
    }

    #[test]
    fn test_incremental_update_matches_rebuild() {
        let mut chain = InsertionChain::new();
        let positions = [(3, 2), (0, 1), (7, 4), (5, 3), (15, 1)];
        let mut len = 10;
        let mut ids = Vec::new();
        for (p, l) in positions {
            ids.push(chain.push(Insertion::new(p, l, p == len)));
            len += l;
        }

        let mut tracked = GenomeTree::build_tracked(&mut chain, FIRST_INSERTION, 10);
        let mut lineage_len = 10;
        let mut previous = FIRST_INSERTION;
        for &id in &ids {
            lineage_len += chain.get(id).length;
            tracked.update(&chain, previous, id);
            previous = id;
            let lineage: Vec<State> = (0..lineage_len).map(|i| (i % 4) as State).collect();
            let rebuilt = GenomeTree::build(&chain, id, lineage_len);
            assert_eq!(
                tracked.export(&lineage, len, G),
                rebuilt.export(&lineage, len, G)
            );
        }
    }

    #[test]
    fn test_export_pads_and_truncates() {
        let tree = GenomeTree::identity(3);
        assert_eq!(tree.export(&[1, 2], 4, G), vec![1, 2, G, G]);
        assert_eq!(tree.export(&[1, 2, 3, 0], 2, G), vec![1, 2]);
    }

    #[test]
    fn test_deep_append_chain_does_not_overflow() {
        let mut chain = InsertionChain::new();
        let mut len = 1;
        for _ in 0..50_000 {
            chain.push(Insertion::new(len, 1, true));
            len += 1;
        }
        let tree = GenomeTree::build(&chain, FIRST_INSERTION, 1);
        let out = tree.export(&[2], len, G);
        assert_eq!(out.len(), len);
        assert_eq!(out[0], 2);
        assert!(out[1..].iter().all(|&s| s == G));
    }
}
