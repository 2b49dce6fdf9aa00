//! Ancestral (root) sequence generation.
//!
//! The root sequence is drawn site by site from a frequency vector. Equal
//! frequencies are drawn uniformly; anything else goes through an
//! accumulated table searched from its most probable state first. The same
//! tables provide the states of inserted blocks.

use crate::base::{Sequence, State};
use crate::errors::{ConfigError, SimulationError};
use crate::model::{is_equal_frequencies, SubstitutionModel};
use crate::sampling::{argmax, sample_accumulated_max_first, to_accumulated};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tolerance on the sum of user frequencies before they are renormalised.
const FREQUENCY_SUM_TOLERANCE: f64 = 1e-7;

/// Where the root frequencies come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RootFrequencies {
    /// The model's equilibrium frequencies (weighted over mixture
    /// components).
    #[default]
    Model,
    /// All states equally likely.
    Equal,
    /// Uniform random values, normalised to one.
    Random,
    /// Explicit frequencies, one per state.
    Custom(Vec<f64>),
}

impl RootFrequencies {
    /// Turn the choice into a concrete frequency vector.
    ///
    /// # Errors
    /// `FrequencyCount` if custom frequencies have the wrong length, and
    /// `InvalidParameter` if they are negative or sum to zero.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        model: &dyn SubstitutionModel,
        rng: &mut R,
    ) -> Result<Vec<f64>, ConfigError> {
        let n = model.num_states();
        match self {
            RootFrequencies::Model => Ok(model.state_frequencies()),
            RootFrequencies::Equal => Ok(vec![1.0 / n as f64; n]),
            RootFrequencies::Random => {
                let raw: Vec<f64> = (0..n).map(|_| rng.random::<f64>()).collect();
                let sum: f64 = raw.iter().sum();
                Ok(raw.into_iter().map(|f| f / sum).collect())
            }
            RootFrequencies::Custom(freqs) => check_frequencies(freqs, n),
        }
    }
}

/// Validate user frequencies, renormalising them if they do not sum to one.
///
/// # Errors
/// See [`RootFrequencies::resolve`].
pub fn check_frequencies(freqs: &[f64], num_states: usize) -> Result<Vec<f64>, ConfigError> {
    if freqs.len() != num_states {
        return Err(ConfigError::FrequencyCount {
            expected: num_states,
            actual: freqs.len(),
        });
    }
    if freqs.iter().any(|f| !(*f >= 0.0) || !f.is_finite()) {
        return Err(ConfigError::InvalidParameter(
            "state frequencies must be finite and non-negative".into(),
        ));
    }
    let sum: f64 = freqs.iter().sum();
    if !(sum > 0.0) {
        return Err(ConfigError::InvalidParameter(
            "state frequencies sum to zero".into(),
        ));
    }
    if (sum - 1.0).abs() >= FREQUENCY_SUM_TOLERANCE {
        warn!(sum, "State frequencies do not sum to 1; normalising");
        return Ok(freqs.iter().map(|f| f / sum).collect());
    }
    Ok(freqs.to_vec())
}

/// Accumulated frequency rows, one per mixture component.
#[derive(Debug, Clone)]
pub struct StateFrequencies {
    num_states: usize,
    acc: Vec<f64>,
    hints: Vec<usize>,
    equal: Vec<bool>,
}

impl StateFrequencies {
    /// A single row.
    pub fn from_frequencies(freqs: &[f64]) -> Self {
        Self::from_rows(freqs.len(), &[freqs.to_vec()])
    }

    /// One row per component of `model`.
    pub fn from_model(model: &dyn SubstitutionModel) -> Self {
        let rows: Vec<Vec<f64>> = (0..model.num_mixtures())
            .map(|c| model.component_frequencies(c))
            .collect();
        Self::from_rows(model.num_states(), &rows)
    }

    fn from_rows(num_states: usize, rows: &[Vec<f64>]) -> Self {
        let mut acc = Vec::with_capacity(rows.len() * num_states);
        let mut hints = Vec::with_capacity(rows.len());
        let mut equal = Vec::with_capacity(rows.len());
        for row in rows {
            hints.push(argmax(row));
            equal.push(is_equal_frequencies(row));
            acc.extend_from_slice(row);
        }
        to_accumulated(&mut acc, rows.len(), num_states);
        Self {
            num_states,
            acc,
            hints,
            equal,
        }
    }

    #[inline]
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Draw one state from row `component` (row 0 if out of range).
    ///
    /// # Errors
    /// `SamplingFailed` if the row does not cover the draw.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R, component: usize) -> Result<State, SimulationError> {
        let row = if component < self.hints.len() { component } else { 0 };
        if self.equal[row] {
            return Ok(rng.random_range(0..self.num_states) as State);
        }
        let n = self.num_states;
        sample_accumulated_max_first(rng, &self.acc, row * n, n, self.hints[row])
            .map(|s| s as State)
            .ok_or(SimulationError::SamplingFailed("state from frequencies"))
    }

    /// Draw `len` states from row 0.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, len: usize) -> Result<Sequence, SimulationError> {
        (0..len).map(|_| self.draw(rng, 0)).collect()
    }
}

/// Check a caller-supplied root sequence against the run's alphabet and
/// the accepted length range `min_len..=max_len`.
///
/// # Errors
/// `ConfigError::RootSequence` describing the mismatch.
pub fn validate_root_sequence(
    sequence: &Sequence,
    min_len: usize,
    max_len: usize,
    num_states: usize,
) -> Result<(), ConfigError> {
    let len = sequence.len();
    if len < min_len || len > max_len {
        let expected = if min_len == max_len {
            format!("{max_len}")
        } else {
            format!("{min_len} to {max_len}")
        };
        return Err(ConfigError::RootSequence(format!(
            "has {len} sites but {expected} are simulated"
        )));
    }
    if let Some(pos) = sequence.iter().position(|&s| s as usize >= num_states) {
        return Err(ConfigError::RootSequence(format!(
            "state at site {pos} is not one of the {num_states} model states"
        )));
    }
    Ok(())
}
