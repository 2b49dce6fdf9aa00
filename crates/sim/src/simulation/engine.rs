//! Simulation engine: a depth-first walk over the phylogeny.
//!
//! Every edge is simulated once, parent before child, in the order of a
//! recursive pre-order traversal. Node sequences live in an arena of buffers
//! indexed by node id; a buffer is dropped as soon as nothing below it needs
//! it, so the resident set stays proportional to the depth of the tree
//! rather than its size.
//!
//! Insertions grow the common coordinate system while the walk is running.
//! After each branch that inserted sites, the lineages still alive are
//! brought up to date with a [`GenomeTree`]; tips that already finished are
//! reconciled once at the end (see [`update_new_genome_indels`]).

use super::ascertainment::{retain_columns, select_variant_columns};
use super::config::SimulationConfig;
use super::output::{OutputMode, SequenceSink, SimulationOutput, StagedFile};
use super::reconcile::{update_new_genome_indels, TipSequence};
use crate::base::{is_gap, Sequence, STATE_UNKNOWN};
use crate::errors::{ConfigError, SimulationError};
use crate::evolution::branch::{
    sample_from_transition_matrix, select_method, switching_threshold, BranchSettings,
};
use crate::evolution::error_model::apply_component_errors;
use crate::evolution::events::{simulate_branch_events, EventState, EventTables, SimulationMethod};
use crate::evolution::fundi::FunDiPermutation;
use crate::evolution::indel::IndelModel;
use crate::evolution::root::{check_frequencies, validate_root_sequence, StateFrequencies};
use crate::genome::{GenomeTree, InsertionChain, InsertionId};
use crate::model::{JumpTables, SiteProfile, SubstitutionModel};
use crate::tree::{Edge, NodeId, Phylogeny};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// A configured simulation, ready to run.
#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulationConfig,
    phylogeny: Phylogeny,
    model: Arc<dyn SubstitutionModel>,
    root_sequence: Option<Sequence>,
}

impl Simulator {
    /// Check the configuration against the tree and the model.
    ///
    /// A tree whose root is a tip is re-rooted at a synthetic node first
    /// (see [`Phylogeny::root_at_synthetic`]).
    ///
    /// # Errors
    /// Any [`ConfigError`]: invalid parameters, a model whose state count
    /// does not match the sequence type, bad branch attributes.
    pub fn new(
        config: SimulationConfig,
        mut phylogeny: Phylogeny,
        model: Arc<dyn SubstitutionModel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let alphabet = config.sequence.seq_type.num_states();
        if model.num_states() != alphabet {
            return Err(ConfigError::StateCount {
                model: model.num_states(),
                alphabet,
            });
        }
        validate_edges(&phylogeny, model.as_ref(), &config)?;

        if phylogeny.root_is_tip() && phylogeny.root_at_synthetic() {
            debug!("Root is a tip; rooted the tree at a synthetic node");
        }
        Ok(Self {
            config,
            phylogeny,
            model,
            root_sequence: None,
        })
    }

    /// Start from `sequence` instead of drawing the root from frequencies.
    ///
    /// # Errors
    /// A root shorter than the simulated length (possible when constant
    /// sites are removed afterwards) is padded with sites drawn from the
    /// root frequencies.
    ///
    /// # Errors
    /// `ConfigError::RootSequence` if it is shorter than the alignment, longer
    /// than the simulated length, or uses states outside the model.
    pub fn with_root_sequence(mut self, sequence: Sequence) -> Result<Self, ConfigError> {
        validate_root_sequence(
            &sequence,
            self.config.sequence.num_sites(),
            self.config.simulated_sites(),
            self.model.num_states(),
        )?;
        self.root_sequence = Some(sequence);
        Ok(self)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn phylogeny(&self) -> &Phylogeny {
        &self.phylogeny
    }

    pub fn model(&self) -> &dyn SubstitutionModel {
        self.model.as_ref()
    }

    /// Simulate the alignment and hand every sequence to `sink`.
    ///
    /// Without a configured seed a random one is drawn; it is reported in
    /// the returned summary.
    ///
    /// # Errors
    /// Any sampling failure aborts the run. Sequences already handed to the
    /// sink stay there, but staged and retained tips are never emitted.
    pub fn run<S: SequenceSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<SimulationOutput, SimulationError> {
        let seed = self.config.execution.seed.unwrap_or_else(rand::random);
        Traversal::new(self, seed)?.run(sink)
    }
}

/// Check per-edge attributes once, before any sampling.
fn validate_edges(
    phylogeny: &Phylogeny,
    model: &dyn SubstitutionModel,
    config: &SimulationConfig,
) -> Result<(), ConfigError> {
    let heterogeneity = &config.evolution.heterogeneity;
    let classes = heterogeneity.num_length_classes();
    for node in phylogeny.preorder() {
        if node == phylogeny.root() {
            continue;
        }
        let edge = phylogeny.edge(node);
        let name = phylogeny.name(node);
        if !(edge.length >= 0.0 && edge.length.is_finite()) {
            return Err(ConfigError::InvalidParameter(format!(
                "edge into '{name}' has length {}",
                edge.length
            )));
        }
        if heterogeneity.is_heterotachy() {
            let actual = edge.class_lengths.as_ref().map_or(0, Vec::len);
            if actual != classes {
                return Err(ConfigError::HeterotachyLengths {
                    node: name.to_string(),
                    expected: classes,
                    actual,
                });
            }
        }
        if let Some(branch_model) = &edge.model {
            if branch_model.num_states() != model.num_states() {
                return Err(ConfigError::StateCount {
                    model: branch_model.num_states(),
                    alphabet: model.num_states(),
                });
            }
            let components = branch_model.num_mixtures();
            if components != 1 && components != model.num_mixtures() {
                return Err(ConfigError::InvalidParameter(format!(
                    "model on edge into '{name}' has {components} components, the run model {}",
                    model.num_mixtures()
                )));
            }
            if let Some(freqs) = &edge.frequencies {
                check_frequencies(freqs, model.num_states())?;
            }
        }
    }
    Ok(())
}

fn released(tree: &Phylogeny, node: NodeId) -> SimulationError {
    SimulationError::ReleasedSequence(tree.name(node).to_string())
}

/// Traversal-time state of one node.
#[derive(Debug, Clone, Default)]
struct NodeBuffer {
    sequence: Option<Sequence>,
    num_gaps: usize,
    children_done: usize,
    /// Latest insertion when this tip finished.
    insertion_pos: Option<InsertionId>,
}

/// Where finished tips wait until the end of the run.
enum TipStore {
    Stream,
    Staged(StagedFile),
    Retained,
}

/// Mutable state of one run.
struct Traversal<'s> {
    sim: &'s Simulator,
    rng: Xoshiro256PlusPlus,
    buffers: Vec<NodeBuffer>,
    events: EventState,
    jump: JumpTables,
    insertion_frequencies: StateFrequencies,
    settings: BranchSettings,
    threshold: f64,
    /// Length of the common coordinate system
    sequence_length: usize,
    fundi: Option<FunDiPermutation>,
    store: TipStore,
    /// Staged or retained tips, in emission order
    tips: Vec<NodeId>,
    /// Keep internal buffers to the end so they can be reconciled or
    /// filtered with the tips
    retain_internal: bool,
    output: SimulationOutput,
}

impl<'s> Traversal<'s> {
    fn new(sim: &'s Simulator, seed: u64) -> Result<Self, SimulationError> {
        let config = &sim.config;
        let model = sim.model.as_ref();
        let tree = &sim.phylogeny;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let sites = config.simulated_sites();
        let heterogeneity = &config.evolution.heterogeneity;

        let profile = SiteProfile::draw(heterogeneity, &model.mixture_weights(), sites, &mut rng)?;
        let root = match &sim.root_sequence {
            Some(sequence) if sequence.len() >= sites => sequence.clone(),
            Some(sequence) => {
                let freqs = config.sequence.root_frequencies.resolve(model, &mut rng)?;
                let padding = StateFrequencies::from_frequencies(&freqs)
                    .generate(&mut rng, sites - sequence.len())?;
                debug!(given = sequence.len(), padded = padding.len(), "Padded root sequence");
                let mut states = sequence.as_slice().to_vec();
                states.extend_from_slice(padding.as_slice());
                Sequence::from_states(states)
            }
            None => {
                let freqs = config.sequence.root_frequencies.resolve(model, &mut rng)?;
                StateFrequencies::from_frequencies(&freqs).generate(&mut rng, sites)?
            }
        };

        let indel_config = &config.indels;
        let indels = if indel_config.is_enabled() {
            IndelModel::new(
                indel_config.insertion_rate,
                indel_config.deletion_rate,
                &indel_config.insertion_distribution,
                &indel_config.deletion_distribution,
            )?
        } else {
            IndelModel::disabled()
        };

        let fundi = match config.fundi.proportion {
            Some(p) if config.fundi.is_enabled() => Some(FunDiPermutation::draw(
                &mut rng,
                p,
                sites,
                config.fundi.taxa.iter().cloned(),
            )?),
            _ => None,
        };

        let settings = BranchSettings {
            branch_scale: config.evolution.branch_scale,
            partition_rate: config.evolution.partition_rate,
            mixture_at_sub_level: config.evolution.mixture_at_sub_level,
            heterotachy: heterogeneity.is_heterotachy(),
            continuous_gamma: heterogeneity.is_continuous(),
        };
        let threshold = config
            .evolution
            .simulation_threshold
            .unwrap_or_else(|| switching_threshold(sites, settings.continuous_gamma));

        let mode = OutputMode::select(
            indels.has_insertions(),
            fundi.is_some(),
            config.output.ascertainment,
        );
        let store = match mode {
            OutputMode::Stream => TipStore::Stream,
            OutputMode::Staged => TipStore::Staged(StagedFile::new()?),
            OutputMode::Retained => TipStore::Retained,
        };
        let retain_internal = config.output.write_internal_sequences
            && (indels.is_enabled() || config.output.ascertainment);

        let mut buffers = vec![NodeBuffer::default(); tree.len()];
        buffers[tree.root()].num_gaps = root.count_gaps();
        buffers[tree.root()].sequence = Some(root);

        info!(
            seed,
            num_leaves = tree.num_leaves(),
            sequence_length = sites,
            model = model.name(),
            ?mode,
            "Starting simulation"
        );

        Ok(Self {
            sim,
            rng,
            buffers,
            events: EventState {
                indels,
                chain: InsertionChain::new(),
                profile,
            },
            jump: JumpTables::from_model(model),
            insertion_frequencies: StateFrequencies::from_model(model),
            settings,
            threshold,
            sequence_length: sites,
            fundi,
            store,
            tips: Vec::new(),
            retain_internal,
            output: SimulationOutput {
                seed,
                ..Default::default()
            },
        })
    }

    fn run<S: SequenceSink + ?Sized>(
        mut self,
        sink: &mut S,
    ) -> Result<SimulationOutput, SimulationError> {
        let sim = self.sim;
        let tree = &sim.phylogeny;
        let root = tree.root();
        let mut stack: Vec<(NodeId, NodeId)> =
            tree.children(root).iter().rev().map(|&c| (root, c)).collect();
        while let Some((parent, child)) = stack.pop() {
            self.simulate_edge(parent, child, sink)?;
            stack.extend(tree.children(child).iter().rev().map(|&c| (child, c)));
        }
        self.finish(sink)
    }

    fn simulate_edge<S: SequenceSink + ?Sized>(
        &mut self,
        parent: NodeId,
        child: NodeId,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        let sim = self.sim;
        let tree = &sim.phylogeny;
        let edge = tree.edge(child);

        let num_children = tree.children(parent).len();
        let parent_buffer = &mut self.buffers[parent];
        if parent_buffer.children_done >= num_children {
            parent_buffer.children_done = 0;
        }
        let num_gaps = parent_buffer.num_gaps;
        self.buffers[child].num_gaps = num_gaps;

        let mut sequence = if edge.length == 0.0 {
            self.buffers[parent]
                .sequence
                .clone()
                .ok_or_else(|| released(tree, parent))?
        } else {
            if parent == tree.root() && edge.model.is_some() {
                if let Some(freqs) = &edge.frequencies {
                    self.regenerate_root(parent, freqs)?;
                }
            }
            let method = select_method(edge, self.threshold, &self.settings, sim.model.is_mixture());
            debug!(node = tree.name(child), ?method, length = edge.length, "Simulating branch");

            let Some(parent_sequence) = self.buffers[parent].sequence.as_ref() else {
                return Err(released(tree, parent));
            };
            let mut sequence = match method {
                SimulationMethod::TransProbMatrix => {
                    self.output.transition_matrix_branches += 1;
                    let model = edge.model.as_deref().unwrap_or(sim.model.as_ref());
                    sample_from_transition_matrix(
                        model,
                        edge,
                        &self.events.profile,
                        parent_sequence,
                        &self.settings,
                        &mut self.rng,
                    )?
                }
                SimulationMethod::RateMatrix => {
                    self.output.rate_matrix_branches += 1;
                    parent_sequence.clone()
                }
            };
            if self.events.indels.is_enabled() || method == SimulationMethod::RateMatrix {
                self.simulate_events(child, edge, method, &mut sequence)?;
            }
            sequence
        };

        let child_is_leaf = tree.is_leaf(child);
        if self.events.indels.has_insertions() && child_is_leaf {
            let latest = self.events.chain.latest();
            self.buffers[child].insertion_pos = Some(latest);
            self.events.chain.register_tip(latest, child);
        }

        // with insertions the permutation waits for final coordinates
        if let Some(fundi) = &self.fundi {
            if !self.events.indels.has_insertions() {
                if tree.is_leaf(parent) {
                    if let Some(parent_sequence) = self.buffers[parent].sequence.as_mut() {
                        fundi.apply(tree.name(parent), parent_sequence);
                    }
                }
                if child_is_leaf {
                    fundi.apply(tree.name(child), &mut sequence);
                }
            }
        }

        if child_is_leaf && sim.model.has_dna_error() {
            let probabilities: Vec<Option<f64>> = (0..sim.model.num_mixtures())
                .map(|c| sim.model.dna_error_probability(c))
                .collect();
            apply_component_errors(
                &mut self.rng,
                &mut sequence,
                &self.events.profile,
                &probabilities,
                sim.model.num_states(),
            )?;
        }

        self.buffers[child].sequence = Some(sequence);
        self.write_and_release(parent, child, sink)
    }

    /// Run the event loop on `sequence` and bring the living lineages up to
    /// date if it inserted sites.
    fn simulate_events(
        &mut self,
        child: NodeId,
        edge: &Edge,
        method: SimulationMethod,
        sequence: &mut Sequence,
    ) -> Result<(), SimulationError> {
        let sim = self.sim;
        let before = self.events.chain.latest();
        let start_len = sequence.len();

        let branch_tables = edge
            .model
            .as_deref()
            .map(|m| (JumpTables::from_model(m), StateFrequencies::from_model(m)));
        let (jump, insertion_frequencies) = match &branch_tables {
            Some((jump, freqs)) => (jump, freqs),
            None => (&self.jump, &self.insertion_frequencies),
        };
        let tables = EventTables {
            jump,
            insertion_frequencies,
            mixture_at_sub_level: self.settings.mixture_at_sub_level,
            rate_scale: self.settings.partition_rate,
        };

        let mut num_gaps = self.buffers[child].num_gaps;
        let counts = simulate_branch_events(
            &tables,
            &mut self.events,
            &mut self.rng,
            sequence,
            &mut num_gaps,
            method,
            edge.length * self.settings.branch_scale,
        )?;
        self.buffers[child].num_gaps = num_gaps;
        self.output.events += counts;
        self.sequence_length = sequence.len();

        if self.events.chain.latest() != before {
            let genome = GenomeTree::build(&self.events.chain, before, start_len);
            self.reconcile_lineages(child, &genome);
            if sim.config.evolution.simulation_threshold.is_none() {
                self.threshold =
                    switching_threshold(self.sequence_length, self.settings.continuous_gamma);
            }
            debug!(
                node = sim.phylogeny.name(child),
                inserted = counts.inserted_sites,
                sequence_length = self.sequence_length,
                "Reconciled living lineages"
            );
        }
        Ok(())
    }

    /// Export the internal buffers that are still needed onto the new
    /// coordinates.
    ///
    /// When internal sequences are written, every simulated internal node
    /// is kept; otherwise only the ancestors of `child` are alive.
    fn reconcile_lineages(&mut self, child: NodeId, genome: &GenomeTree) {
        let sim = self.sim;
        let tree = &sim.phylogeny;
        let len = self.sequence_length;
        let targets: Vec<NodeId> = if sim.config.output.write_internal_sequences {
            tree.preorder()
                .into_iter()
                .filter(|&n| n != child && !tree.is_leaf(n))
                .collect()
        } else {
            std::iter::successors(tree.parent(child), |&n| tree.parent(n))
                .filter(|&n| !tree.is_leaf(n))
                .collect()
        };
        for node in targets {
            let buffer = &mut self.buffers[node];
            if let Some(sequence) = buffer.sequence.as_mut() {
                buffer.num_gaps += len.saturating_sub(sequence.len());
                *sequence = Sequence::from_states(genome.export(sequence.as_slice(), len, STATE_UNKNOWN));
            }
        }
    }

    /// Redraw the real sites of the root from branch-specific frequencies.
    fn regenerate_root(&mut self, root: NodeId, freqs: &[f64]) -> Result<(), SimulationError> {
        let sim = self.sim;
        let freqs = check_frequencies(freqs, sim.model.num_states())?;
        let table = StateFrequencies::from_frequencies(&freqs);
        let Some(sequence) = self.buffers[root].sequence.as_mut() else {
            return Err(released(&sim.phylogeny, root));
        };
        for state in sequence.as_mut_slice() {
            if !is_gap(*state) {
                *state = table.draw(&mut self.rng, 0)?;
            }
        }
        debug!("Regenerated root sequence from branch frequencies");
        Ok(())
    }

    fn write_and_release<S: SequenceSink + ?Sized>(
        &mut self,
        parent: NodeId,
        child: NodeId,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        let sim = self.sim;
        let tree = &sim.phylogeny;

        if tree.is_leaf(child) {
            self.emit_tip(child, sink)?;
        }
        // the only leaf above an edge is the synthetic root, never emitted
        if tree.is_leaf(parent) {
            self.buffers[parent].sequence = None;
        }

        let buffer = &mut self.buffers[parent];
        buffer.children_done += 1;
        let finished = buffer.children_done >= tree.children(parent).len();
        if finished && !tree.is_leaf(parent) && !self.retain_internal {
            if let Some(sequence) = buffer.sequence.take() {
                if sim.config.output.write_internal_sequences {
                    sink.write(tree.name(parent), sequence.as_slice())?;
                    self.output.sequences_written += 1;
                }
            }
        }
        Ok(())
    }

    fn emit_tip<S: SequenceSink + ?Sized>(
        &mut self,
        node: NodeId,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        let sim = self.sim;
        let name = sim.phylogeny.name(node);
        let buffer = &mut self.buffers[node];
        match &mut self.store {
            TipStore::Stream => {
                let sequence = buffer
                    .sequence
                    .take()
                    .ok_or_else(|| released(&sim.phylogeny, node))?;
                sink.write(name, sequence.as_slice())?;
                self.output.sequences_written += 1;
            }
            TipStore::Staged(file) => {
                let sequence = buffer
                    .sequence
                    .take()
                    .ok_or_else(|| released(&sim.phylogeny, node))?;
                file.write(name, sequence.as_slice())?;
                self.tips.push(node);
            }
            TipStore::Retained => self.tips.push(node),
        }
        Ok(())
    }

    /// Collect the tips parked during the walk.
    fn collect_tips(&mut self) -> Result<Vec<TipSequence>, SimulationError> {
        let sim = self.sim;
        let tree = &sim.phylogeny;
        match std::mem::replace(&mut self.store, TipStore::Stream) {
            TipStore::Stream => Ok(Vec::new()),
            TipStore::Staged(file) => {
                let records = file.read_back()?;
                if records.len() != self.tips.len() {
                    return Err(SimulationError::MalformedStagedRecord {
                        line: records.len(),
                        reason: format!("expected {} staged tips", self.tips.len()),
                    });
                }
                records
                    .into_iter()
                    .zip(&self.tips)
                    .enumerate()
                    .map(|(i, ((name, states), &node))| {
                        if name != tree.name(node) {
                            return Err(SimulationError::MalformedStagedRecord {
                                line: i + 1,
                                reason: format!("expected '{}', found '{name}'", tree.name(node)),
                            });
                        }
                        Ok(TipSequence {
                            node,
                            name,
                            insertion: self.buffers[node].insertion_pos,
                            sequence: Sequence::from_states(states),
                        })
                    })
                    .collect()
            }
            TipStore::Retained => {
                let mut tips = Vec::with_capacity(self.tips.len());
                for &node in &self.tips {
                    let buffer = &mut self.buffers[node];
                    let Some(sequence) = buffer.sequence.take() else {
                        return Err(released(tree, node));
                    };
                    tips.push(TipSequence {
                        node,
                        name: tree.name(node).to_string(),
                        insertion: buffer.insertion_pos,
                        sequence,
                    });
                }
                Ok(tips)
            }
        }
    }

    /// Reconcile, permute and filter the parked sequences, then emit them.
    fn finish<S: SequenceSink + ?Sized>(
        mut self,
        sink: &mut S,
    ) -> Result<SimulationOutput, SimulationError> {
        let sim = self.sim;
        let tree = &sim.phylogeny;
        let config = &sim.config;
        let parallel = config.execution.parallel;
        let final_len = self.sequence_length;

        let mut tips = self.collect_tips()?;
        if self.events.indels.has_insertions() {
            let step = (config.indels.rebuild_indel_history * tree.num_leaves() as f64) as usize;
            update_new_genome_indels(&mut self.events.chain, &mut tips, final_len, step, parallel);
            debug!(
                tips = tips.len(),
                insertions = self.events.chain.len() - 1,
                "Reconciled tips to the final length"
            );
            if let Some(fundi) = &self.fundi {
                for tip in &mut tips {
                    fundi.apply(&tip.name, &mut tip.sequence);
                }
            }
        }

        let mut internal: Vec<(NodeId, Sequence)> = Vec::new();
        if self.retain_internal {
            for node in tree.preorder() {
                if !tree.is_leaf(node) {
                    if let Some(sequence) = self.buffers[node].sequence.take() {
                        internal.push((node, sequence));
                    }
                }
            }
        }

        let mut sequence_length = final_len;
        if config.output.ascertainment {
            let expected = config.sequence.num_sites();
            let columns = select_variant_columns(
                tips.iter().map(|t| &t.sequence),
                final_len,
                expected,
                self.events.indels.has_insertions(),
            )?;
            if parallel {
                tips.par_iter_mut()
                    .for_each(|t| retain_columns(&mut t.sequence, &columns));
            } else {
                tips.iter_mut()
                    .for_each(|t| retain_columns(&mut t.sequence, &columns));
            }
            for (_, sequence) in &mut internal {
                retain_columns(sequence, &columns);
            }
            self.events.profile.retain_sites(&columns);
            sequence_length = columns.len();
            debug!(simulated = final_len, kept = sequence_length, "Removed constant sites");
        }

        for tip in &tips {
            sink.write(&tip.name, tip.sequence.as_slice())?;
        }
        for (node, sequence) in &internal {
            sink.write(tree.name(*node), sequence.as_slice())?;
        }
        self.output.sequences_written += tips.len() + internal.len();
        self.output.sequence_length = sequence_length;

        info!(
            sequences = self.output.sequences_written,
            sequence_length,
            insertions = self.output.events.insertions,
            deletions = self.output.events.deletions,
            "Simulation finished"
        );
        Ok(self.output)
    }
}
