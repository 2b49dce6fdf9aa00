//! Arena-backed phylogeny consumed by the simulator.
//!
//! Nodes are stored in one vector and referenced by [`NodeId`]. Each non-root
//! node owns the [`Edge`] leading to it from its parent, so edge attributes
//! (length, branch-specific model, per-class lengths) are looked up by the
//! child id. The tree is built top-down by the caller; no parsing is done
//! here.
//!
//! Leaves follow the usual phylogenetic convention: a node of degree one. A
//! root with a single child is therefore a tip, as in an unrooted tree drawn
//! from one of its leaves.

use crate::errors::SimulationError;
use crate::model::SubstitutionModel;
use std::sync::Arc;

/// Index of a node in a [`Phylogeny`].
pub type NodeId = usize;

/// Name of the synthetic root added by [`Phylogeny::root_at_synthetic`].
/// Its sequence is never emitted.
pub const ROOT_NAME: &str = "__root__";

/// Attributes of the edge leading into a node.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    /// Branch length in expected substitutions per site.
    pub length: f64,

    /// Model that replaces the run's model on this edge.
    pub model: Option<Arc<dyn SubstitutionModel>>,

    /// Root frequencies for the branch model; only read on edges leaving the
    /// root.
    pub frequencies: Option<Vec<f64>>,

    /// One length per heterotachy class.
    pub class_lengths: Option<Vec<f64>>,
}

impl Edge {
    pub fn new(length: f64) -> Self {
        Self {
            length,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: Arc<dyn SubstitutionModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_frequencies(mut self, frequencies: Vec<f64>) -> Self {
        self.frequencies = Some(frequencies);
        self
    }

    pub fn with_class_lengths(mut self, lengths: Vec<f64>) -> Self {
        self.class_lengths = Some(lengths);
        self
    }

    /// Length used for sites of heterotachy class `class`.
    ///
    /// Falls back to the plain length when no class lengths are attached.
    #[inline]
    pub fn class_length(&self, class: usize) -> f64 {
        self.class_lengths
            .as_ref()
            .and_then(|l| l.get(class).copied())
            .unwrap_or(self.length)
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    edge: Edge,
    children: Vec<NodeId>,
}

/// A rooted phylogeny.
#[derive(Debug, Clone)]
pub struct Phylogeny {
    nodes: Vec<Node>,
    root: NodeId,
    /// Root added by [`Phylogeny::root_at_synthetic`]
    synthetic_root: Option<NodeId>,
}

impl Phylogeny {
    /// A tree holding only its root.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node {
                name: root_name.into(),
                parent: None,
                edge: Edge::default(),
                children: Vec::new(),
            }],
            root: 0,
            synthetic_root: None,
        }
    }

    /// A star tree: every name becomes a leaf hanging off the root.
    pub fn star<S: AsRef<str>>(names: &[S], length: f64) -> Self {
        let mut tree = Self::new("");
        for name in names {
            tree.nodes.push(Node {
                name: name.as_ref().to_string(),
                parent: Some(0),
                edge: Edge::new(length),
                children: Vec::new(),
            });
            let id = tree.nodes.len() - 1;
            tree.nodes[0].children.push(id);
        }
        tree
    }

    /// Attach a new child below `parent` and return its id.
    ///
    /// # Errors
    /// `UnknownNode` if `parent` is not in the tree.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        edge: Edge,
    ) -> Result<NodeId, SimulationError> {
        if parent >= self.nodes.len() {
            return Err(SimulationError::UnknownNode(parent));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.into(),
            parent: Some(parent),
            edge,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes, internal ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        id < self.nodes.len()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Edge leading into `id`; the root carries a default zero-length edge.
    pub fn edge(&self, id: NodeId) -> &Edge {
        &self.nodes[id].edge
    }

    pub fn edge_mut(&mut self, id: NodeId) -> &mut Edge {
        &mut self.nodes[id].edge
    }

    /// Number of neighbours (children plus parent).
    pub fn degree(&self, id: NodeId) -> usize {
        self.nodes[id].children.len() + usize::from(self.nodes[id].parent.is_some())
    }

    /// `true` for nodes of degree one (or an isolated root).
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.degree(id) <= 1
    }

    /// `true` if the root is itself a tip.
    pub fn root_is_tip(&self) -> bool {
        self.is_leaf(self.root)
    }

    /// Leaves in depth-first order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.is_leaf(id))
            .collect()
    }

    /// Number of leaves, the synthetic root excluded.
    pub fn num_leaves(&self) -> usize {
        self.leaves()
            .into_iter()
            .filter(|&id| !self.is_synthetic(id))
            .count()
    }

    /// `true` for the node added by [`Phylogeny::root_at_synthetic`].
    pub fn is_synthetic(&self, id: NodeId) -> bool {
        self.synthetic_root == Some(id)
    }

    /// Node ids in depth-first pre-order, children in insertion order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    /// Look a node up by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Re-root a tree whose root is a tip.
    ///
    /// A synthetic [`ROOT_NAME`] node becomes the root, joined by a
    /// zero-length edge to the old root's neighbour. The old root keeps its
    /// edge and hangs below that neighbour like any other tip. Trees whose
    /// root already has several children are left untouched; returns
    /// whether the tree changed.
    pub fn root_at_synthetic(&mut self) -> bool {
        let old_root = self.root;
        let &[neighbour] = self.nodes[old_root].children.as_slice() else {
            return false;
        };

        let new_root = self.nodes.len();
        self.nodes.push(Node {
            name: ROOT_NAME.to_string(),
            parent: None,
            edge: Edge::default(),
            children: vec![neighbour],
        });

        // old root -> neighbour becomes neighbour -> old root
        let old_edge = std::mem::take(&mut self.nodes[neighbour].edge);
        self.nodes[neighbour].edge = Edge::new(0.0);
        self.nodes[neighbour].parent = Some(new_root);
        self.nodes[neighbour].children.insert(0, old_root);

        let node = &mut self.nodes[old_root];
        node.children.clear();
        node.parent = Some(neighbour);
        node.edge = old_edge;

        self.root = new_root;
        self.synthetic_root = Some(new_root);
        true
    }
}
