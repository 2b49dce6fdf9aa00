//! Builder pattern for creating simulations.
//!
//! Provides a fluent API over [`SimulationConfig`] with validation deferred
//! to [`SimulationBuilder::build`].

use super::config::SimulationConfig;
use super::engine::Simulator;
use crate::base::{SeqType, Sequence};
pub use crate::errors::BuilderError;
use crate::evolution::{IndelDistribution, RootFrequencies};
use crate::model::{RateHeterogeneity, SubstitutionModel};
use crate::tree::Phylogeny;
use std::sync::Arc;

/// Builder for constructing [`Simulator`] instances with a fluent API.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use treevo_sim::model::ReversibleModel;
/// use treevo_sim::simulation::{MemorySink, SimulationBuilder};
/// use treevo_sim::tree::Phylogeny;
///
/// let sim = SimulationBuilder::new()
///     .tree(Phylogeny::star(&["A", "B", "C"], 0.1))
///     .model(Arc::new(ReversibleModel::jc().unwrap()))
///     .length(500)
///     .seed(42)
///     .build()
///     .unwrap();
///
/// let mut sink = MemorySink::new();
/// let output = sim.run(&mut sink).unwrap();
/// assert_eq!(output.sequences_written, 3);
/// assert_eq!(sink.get("A").unwrap().len(), 500);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimulationBuilder {
    // Required
    tree: Option<Phylogeny>,
    model: Option<Arc<dyn SubstitutionModel>>,

    config: SimulationConfig,
    root_sequence: Option<Sequence>,
}

impl SimulationBuilder {
    /// Create a new simulation builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one read from JSON.
    pub fn from_config(config: SimulationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the tree (required).
    pub fn tree(mut self, tree: Phylogeny) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Set the substitution model (required).
    pub fn model(mut self, model: Arc<dyn SubstitutionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Alignment length in characters (default: 1000).
    pub fn length(mut self, length: usize) -> Self {
        self.config.sequence.length = length;
        self
    }

    pub fn seq_type(mut self, seq_type: SeqType) -> Self {
        self.config.sequence.seq_type = seq_type;
        self
    }

    pub fn root_frequencies(mut self, frequencies: RootFrequencies) -> Self {
        self.config.sequence.root_frequencies = frequencies;
        self
    }

    /// Start from a fixed root sequence instead of drawing one.
    pub fn root_sequence(mut self, sequence: Sequence) -> Self {
        self.root_sequence = Some(sequence);
        self
    }

    /// Set the RNG seed (default: random).
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.execution.seed = Some(seed);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.execution.parallel = parallel;
        self
    }

    pub fn heterogeneity(mut self, heterogeneity: RateHeterogeneity) -> Self {
        self.config.evolution.heterogeneity = heterogeneity;
        self
    }

    /// Multiply every branch length by `scale` (default: 1).
    pub fn branch_scale(mut self, scale: f64) -> Self {
        self.config.evolution.branch_scale = scale;
        self
    }

    pub fn partition_rate(mut self, rate: f64) -> Self {
        self.config.evolution.partition_rate = rate;
        self
    }

    /// Fix the branch length above which whole branches are sampled from
    /// `P(t)`.
    pub fn simulation_threshold(mut self, threshold: f64) -> Self {
        self.config.evolution.simulation_threshold = Some(threshold);
        self
    }

    pub fn mixture_at_sub_level(mut self, enabled: bool) -> Self {
        self.config.evolution.mixture_at_sub_level = enabled;
        self
    }

    /// Enable insertions and deletions.
    ///
    /// # Arguments
    /// * `insertion_rate` - Relative to the substitution rate
    /// * `deletion_rate` - Relative to the substitution rate
    /// * `insertion` - Insertion size distribution
    /// * `deletion` - Deletion size distribution
    pub fn indels(
        mut self,
        insertion_rate: f64,
        deletion_rate: f64,
        insertion: IndelDistribution,
        deletion: IndelDistribution,
    ) -> Self {
        let indels = &mut self.config.indels;
        indels.insertion_rate = insertion_rate;
        indels.deletion_rate = deletion_rate;
        indels.insertion_distribution = insertion;
        indels.deletion_distribution = deletion;
        self
    }

    pub fn rebuild_indel_history(mut self, fraction: f64) -> Self {
        self.config.indels.rebuild_indel_history = fraction;
        self
    }

    pub fn write_internal_sequences(mut self, enabled: bool) -> Self {
        self.config.output.write_internal_sequences = enabled;
        self
    }

    /// Emit only variant sites, simulating `length_ratio` times the
    /// requested length to find enough of them.
    pub fn ascertainment(mut self, length_ratio: f64) -> Self {
        self.config.output.ascertainment = true;
        self.config.output.length_ratio = length_ratio;
        self
    }

    /// Permute a proportion of sites in the listed taxa.
    pub fn fundi<I, S>(mut self, taxa: I, proportion: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fundi.taxa = taxa.into_iter().map(Into::into).collect();
        self.config.fundi.proportion = Some(proportion);
        self
    }

    /// The configuration assembled so far.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Build the simulator.
    ///
    /// # Errors
    /// `MissingRequired` if no tree or model was given, and `Config` if the
    /// configuration does not validate against them.
    pub fn build(self) -> Result<Simulator, BuilderError> {
        let tree = self.tree.ok_or(BuilderError::MissingRequired("tree"))?;
        let model = self.model.ok_or(BuilderError::MissingRequired("model"))?;
        let simulator = Simulator::new(self.config, tree, model)?;
        match self.root_sequence {
            Some(sequence) => Ok(simulator.with_root_sequence(sequence)?),
            None => Ok(simulator),
        }
    }
}
