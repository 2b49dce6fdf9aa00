//! Error types for model construction, configuration and simulation runs.
//!
//! Configuration problems are reported before any sampling happens. Sampling
//! failures (retry budgets exhausted, no valid position) abort the run and are
//! surfaced to the caller unchanged; nothing is emitted after such an error.

use thiserror::Error;

/// Error returned when an index is outside the valid range for a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Index {index} out of bounds (len = {len})")]
pub struct OutOfBounds {
    /// The index that was requested
    pub index: usize,

    /// The current length of the sequence (upper bound)
    pub len: usize,
}

/// Errors raised while assembling a substitution model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Frequencies must be finite, non-negative and sum to a positive value.
    #[error("Invalid state frequencies: {0}")]
    InvalidFrequencies(String),

    /// Exchangeabilities must be finite and non-negative.
    #[error("Invalid exchangeability {value} at index {index}")]
    InvalidRate { index: usize, value: f64 },

    /// Vector length does not match the number of states.
    #[error("Expected {expected} values for {what}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Mixture components disagree on the number of states.
    #[error("Mixture components must share one state space")]
    InconsistentMixture,

    /// Mixture weights must be positive.
    #[error("Invalid mixture weights: {0}")]
    InvalidWeights(String),

    /// A probability outside [0, 1].
    #[error("Invalid probability for {0}: {1} (must be between 0.0 and 1.0)")]
    InvalidProbability(&'static str, f64),

    /// The model has no mixing: every exit rate is zero.
    #[error("Rate matrix has no transitions")]
    DegenerateRateMatrix,
}

/// Errors in the run configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Sequence length must be positive")]
    EmptySequence,

    /// Codon alignments are simulated in triplets.
    #[error("Sequence length {0} is not divisible by 3, which codon sequences require")]
    CodonLength(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The number of supplied frequencies differs from the state count.
    #[error("The number of frequencies ({actual}) differs from the number of states ({expected})")]
    FrequencyCount { expected: usize, actual: usize },

    /// Heterotachy needs one length per class on every edge.
    #[error("Edge into '{node}' has {actual} lengths but the heterotachy model has {expected} classes")]
    HeterotachyLengths {
        node: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid indel size distribution: {0}")]
    IndelDistribution(String),

    #[error("FunDi proportion {0} must be in (0, 1)")]
    FunDiProportion(f64),

    /// Model and run configuration disagree on the alphabet.
    #[error("Model has {model} states but the sequence type has {alphabet}")]
    StateCount { model: usize, alphabet: usize },

    /// Root sequences must use the configured alphabet and length.
    #[error("Invalid root sequence: {0}")]
    RootSequence(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Fatal errors raised while a simulation is running.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Indel sizes are redrawn a bounded number of times.
    #[error("Failed to draw a positive indel size after {0} attempts; please check the indel-size distribution")]
    IndelLengthExhausted(usize),

    /// Every candidate position below the bound is a deleted site.
    #[error("No valid position below {upper_bound} for an indel event in a sequence of {len} sites")]
    NoValidPosition { upper_bound: usize, len: usize },

    /// An accumulated probability search found no bucket.
    #[error("Failed to sample {0}: accumulated probabilities do not cover the drawn value")]
    SamplingFailed(&'static str),

    /// Positive sizes never came up while estimating the mean deletion size.
    #[error("Could not estimate the mean deletion size: every draw was non-positive")]
    MeanDeletionSize,

    #[error("FunDi site selection failed: {0}")]
    FunDiSelection(String),

    /// The error probability asks for more changed sites than exist.
    #[error("Sequencing-error model needs {needed} changed sites but only {available} are available")]
    ErrorModelExhausted { needed: usize, available: usize },

    /// Too few variable sites were produced to honour the requested length.
    #[error("Only {found} variant sites were generated but {expected} are required; increase the length ratio")]
    TooFewVariantSites { found: usize, expected: usize },

    #[error("Malformed staged record at line {line}: {reason}")]
    MalformedStagedRecord { line: usize, reason: String },

    /// A node referenced by the traversal is missing from the phylogeny.
    #[error("Unknown node {0}")]
    UnknownNode(usize),

    /// A buffer was read after it had been released.
    #[error("Sequence of node '{0}' is no longer available")]
    ReleasedSequence(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during simulation building.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// A required parameter is missing
    #[error("Missing required parameter: {0}")]
    MissingRequired(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
