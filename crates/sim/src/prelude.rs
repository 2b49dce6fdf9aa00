//! Commonly used imports for convenience.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use treevo_sim::prelude::*;
//!
//! let mut tree = Phylogeny::new("root");
//! let ab = tree.add_child(0, "AB", Edge::new(0.05)).unwrap();
//! tree.add_child(ab, "A", Edge::new(0.1)).unwrap();
//! tree.add_child(ab, "B", Edge::new(0.1)).unwrap();
//! tree.add_child(0, "C", Edge::new(0.2)).unwrap();
//!
//! let sim = SimulationBuilder::new()
//!     .tree(tree)
//!     .model(Arc::new(ReversibleModel::jc().unwrap()))
//!     .length(100)
//!     .seed(1)
//!     .build()
//!     .unwrap();
//! let mut sink = MemorySink::new();
//! sim.run(&mut sink).unwrap();
//!
//! let mapping = StateMapping::new(SeqType::Dna);
//! let text = mapping.render(sink.get("A").unwrap());
//! assert_eq!(text.len(), 100);
//! ```

pub use crate::base::{SeqType, Sequence, State, StateMapping};
pub use crate::errors::{self, BuilderError, ConfigError, SimulationError};
pub use crate::evolution::{IndelDistribution, RootFrequencies};
pub use crate::model::{MixtureModel, RateHeterogeneity, ReversibleModel, SubstitutionModel};
pub use crate::simulation::{
    MemorySink, SequenceSink, SimulationBuilder, SimulationConfig, SimulationOutput, Simulator,
};
pub use crate::tree::{Edge, Phylogeny};
