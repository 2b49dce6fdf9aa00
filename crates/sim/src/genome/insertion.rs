//! Chronological log of insertion events.
//!
//! Every insertion that fires anywhere in the tree is appended here. The log
//! is the only record of how the common coordinate system grew, so it lives
//! for the whole run: tips that finished early are reconciled against it
//! once the final length is known.

use crate::tree::NodeId;

/// Index of an insertion record; ids are assigned in chronological order.
pub type InsertionId = usize;

/// Id of the sentinel record that heads every chain.
pub const FIRST_INSERTION: InsertionId = 0;

/// One insertion event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Insertion {
    /// Site index, in the coordinate system at the time of insertion, that
    /// the first inserted site occupies.
    pub position: usize,

    /// Number of inserted sites.
    pub length: usize,

    /// The block was appended after the last site.
    pub at_end: bool,

    /// Genome-tree leaves spawned by this insertion in the currently tracked
    /// tree.
    pub genome_nodes: Vec<usize>,

    /// Tips whose simulation finished while this was the latest insertion.
    pub phylo_nodes: Vec<NodeId>,
}

impl Insertion {
    pub fn new(position: usize, length: usize, at_end: bool) -> Self {
        Self {
            position,
            length,
            at_end,
            ..Default::default()
        }
    }
}

/// Append-only arena of insertions headed by an empty sentinel.
#[derive(Debug, Clone)]
pub struct InsertionChain {
    records: Vec<Insertion>,
}

impl InsertionChain {
    /// A chain holding only the sentinel.
    pub fn new() -> Self {
        Self {
            records: vec![Insertion::default()],
        }
    }

    /// Append a record and return its id.
    pub fn push(&mut self, insertion: Insertion) -> InsertionId {
        self.records.push(insertion);
        self.records.len() - 1
    }

    /// Id of the most recent record (the sentinel if nothing was inserted).
    #[inline]
    pub fn latest(&self) -> InsertionId {
        self.records.len() - 1
    }

    /// The record following `id`, if any.
    #[inline]
    pub fn next(&self, id: InsertionId) -> Option<InsertionId> {
        (id + 1 < self.records.len()).then_some(id + 1)
    }

    #[inline]
    pub fn get(&self, id: InsertionId) -> &Insertion {
        &self.records[id]
    }

    #[inline]
    pub fn get_mut(&mut self, id: InsertionId) -> &mut Insertion {
        &mut self.records[id]
    }

    /// Number of records, sentinel included.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` if only the sentinel is present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.len() == 1
    }

    /// Records strictly after `from`, in chronological order.
    pub fn after(&self, from: InsertionId) -> impl Iterator<Item = (InsertionId, &Insertion)> {
        self.records.iter().enumerate().skip(from + 1)
    }

    /// Total number of sites inserted strictly after `from`.
    pub fn inserted_after(&self, from: InsertionId) -> usize {
        self.after(from).map(|(_, ins)| ins.length).sum()
    }

    /// Attach a finished tip to a record.
    pub fn register_tip(&mut self, id: InsertionId, node: NodeId) {
        self.records[id].phylo_nodes.push(node);
    }

    /// Drop every genome-tree back-reference from `from` onwards.
    pub fn clear_genome_nodes_from(&mut self, from: InsertionId) {
        for record in self.records.iter_mut().skip(from) {
            record.genome_nodes.clear();
        }
    }

    /// Ids of records that have tips attached, in chronological order.
    pub fn with_tips(&self) -> Vec<InsertionId> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.phylo_nodes.is_empty())
            .map(|(id, _)| id)
            .collect()
    }
}

impl Default for InsertionChain {
    fn default() -> Self {
        Self::new()
    }
}
