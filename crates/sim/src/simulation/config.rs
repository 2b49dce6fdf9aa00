//! Run configuration.
//!
//! A [`SimulationConfig`] can be deserialized from JSON to fully reproduce a
//! run setup; every group falls back to its defaults when omitted.

use crate::base::SeqType;
use crate::errors::ConfigError;
use crate::evolution::{IndelDistribution, RootFrequencies};
use crate::model::RateHeterogeneity;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    pub execution: ExecutionConfig,
    pub sequence: SequenceConfig,
    pub evolution: EvolutionConfig,
    pub indels: IndelConfig,
    pub output: OutputConfig,
    pub fundi: FunDiConfig,
}

/// Reproducibility and threading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Optional RNG seed for reproducibility
    pub seed: Option<u64>,
    /// Run the post-traversal passes (reconciliation, constant-site
    /// filtering) on the rayon pool
    pub parallel: bool,
}

/// What is simulated at the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Alignment length in characters (nucleotides for codon data)
    pub length: usize,
    pub seq_type: SeqType,
    pub root_frequencies: RootFrequencies,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            length: 1_000,
            seq_type: SeqType::Dna,
            root_frequencies: RootFrequencies::Model,
        }
    }
}

impl SequenceConfig {
    /// Number of simulated states per sequence.
    pub fn num_sites(&self) -> usize {
        self.length / self.seq_type.sites_per_state()
    }
}

/// Branch handling and among-site rate variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Multiplier applied to every branch length
    pub branch_scale: f64,
    /// Relative rate of this partition
    pub partition_rate: f64,
    /// Fixed branch-length threshold between the two branch methods;
    /// derived from the sequence length when unset
    pub simulation_threshold: Option<f64>,
    /// Draw a mixture component for every substitution instead of once per
    /// site
    pub mixture_at_sub_level: bool,
    pub heterogeneity: RateHeterogeneity,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            branch_scale: 1.0,
            partition_rate: 1.0,
            simulation_threshold: None,
            mixture_at_sub_level: false,
            heterogeneity: RateHeterogeneity::Uniform,
        }
    }
}

/// Insertion and deletion process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndelConfig {
    /// Insertion rate relative to the substitution rate
    pub insertion_rate: f64,
    /// Deletion rate relative to the substitution rate
    pub deletion_rate: f64,
    pub insertion_distribution: IndelDistribution,
    pub deletion_distribution: IndelDistribution,
    /// Fraction of the leaves reconciled between two rebuilds of the genome
    /// tree during final reconciliation
    pub rebuild_indel_history: f64,
}

impl Default for IndelConfig {
    fn default() -> Self {
        Self {
            insertion_rate: 0.0,
            deletion_rate: 0.0,
            insertion_distribution: IndelDistribution::default(),
            deletion_distribution: IndelDistribution::default(),
            rebuild_indel_history: 1.0 / 3.0,
        }
    }
}

impl IndelConfig {
    pub fn is_enabled(&self) -> bool {
        self.insertion_rate + self.deletion_rate != 0.0
    }
}

/// Which sequences are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Also emit the sequences of internal nodes
    pub write_internal_sequences: bool,
    /// Remove constant sites from the output (ascertainment bias correction)
    pub ascertainment: bool,
    /// Oversampling factor used with `ascertainment`
    pub length_ratio: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_internal_sequences: false,
            ascertainment: false,
            length_ratio: 1.0,
        }
    }
}

/// FunDi site permutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FunDiConfig {
    /// Taxa whose selected sites are permuted
    pub taxa: Vec<String>,
    /// Proportion of sites to permute, in `(0, 1)`
    pub proportion: Option<f64>,
}

impl FunDiConfig {
    pub fn is_enabled(&self) -> bool {
        self.proportion.is_some() && !self.taxa.is_empty()
    }
}

impl SimulationConfig {
    /// # Errors
    /// `ConfigError::Parse` if the text is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// # Errors
    /// `ConfigError::Parse` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// # Errors
    /// `ConfigError::Parse` if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Number of states simulated per sequence before constant-site removal.
    pub fn simulated_sites(&self) -> usize {
        let sites = self.sequence.num_sites();
        if self.output.ascertainment {
            (sites as f64 * self.output.length_ratio).round() as usize
        } else {
            sites
        }
    }

    /// Check every parameter that does not depend on the tree or the model.
    ///
    /// # Errors
    /// The first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seq = &self.sequence;
        if seq.length == 0 {
            return Err(ConfigError::EmptySequence);
        }
        if seq.seq_type == SeqType::Codon && seq.length % 3 != 0 {
            return Err(ConfigError::CodonLength(seq.length));
        }

        let evo = &self.evolution;
        positive("branch_scale", evo.branch_scale, true)?;
        positive("partition_rate", evo.partition_rate, false)?;
        if let Some(threshold) = evo.simulation_threshold {
            positive("simulation_threshold", threshold, true)?;
        }
        evo.heterogeneity.validate()?;

        let indels = &self.indels;
        positive("insertion_rate", indels.insertion_rate, true)?;
        positive("deletion_rate", indels.deletion_rate, true)?;
        if indels.insertion_rate > 0.0 {
            indels.insertion_distribution.validate()?;
        }
        if indels.deletion_rate > 0.0 {
            indels.deletion_distribution.validate()?;
        }
        positive("rebuild_indel_history", indels.rebuild_indel_history, true)?;

        if !(self.output.length_ratio >= 1.0 && self.output.length_ratio.is_finite()) {
            return Err(ConfigError::InvalidParameter(format!(
                "length_ratio must be at least 1, got {}",
                self.output.length_ratio
            )));
        }

        if let Some(p) = self.fundi.proportion {
            if !(p > 0.0 && p < 1.0) {
                return Err(ConfigError::FunDiProportion(p));
            }
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let ok = value.is_finite() && if allow_zero { value >= 0.0 } else { value > 0.0 };
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter(format!(
            "{name} must be {}, got {value}",
            if allow_zero { "non-negative" } else { "positive" }
        )))
    }
}
