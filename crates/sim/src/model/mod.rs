//! Substitution models consumed by the simulator.
//!
//! The engine only needs a handful of quantities from a model: its state
//! frequencies, its instantaneous rate matrix and transition probabilities
//! for a given time. [`SubstitutionModel`] is that seam. A time-reversible
//! family ([`ReversibleModel`]) and a weighted mixture of such models
//! ([`MixtureModel`]) are provided; anything else can be plugged in by
//! implementing the trait.

mod gamma;
pub mod heterogeneity;
mod jump;
mod mixture;
mod reversible;

use std::fmt;

pub use gamma::discrete_gamma_rates;
pub use heterogeneity::{RateHeterogeneity, SiteProfile};
pub use jump::JumpTables;
pub use mixture::MixtureModel;
pub use reversible::ReversibleModel;

/// Continuous-time Markov model of character evolution.
///
/// Matrices are `num_states x num_states`, row-major. For mixtures every
/// per-component method is indexed by `component < num_mixtures()`.
pub trait SubstitutionModel: fmt::Debug + Send + Sync {
    /// Human-readable name, used in log output.
    fn name(&self) -> &str;

    fn num_states(&self) -> usize;

    /// Number of mixture components; 1 for a plain model.
    fn num_mixtures(&self) -> usize {
        1
    }

    /// Component weights summing to one.
    fn mixture_weights(&self) -> Vec<f64> {
        vec![1.0]
    }

    /// Overall equilibrium frequencies.
    fn state_frequencies(&self) -> Vec<f64>;

    /// Equilibrium frequencies of one component.
    fn component_frequencies(&self, component: usize) -> Vec<f64> {
        let _ = component;
        self.state_frequencies()
    }

    /// Instantaneous rate matrix `Q` of one component.
    fn rate_matrix(&self, component: usize) -> Vec<f64>;

    /// Transition probabilities `P(t) = exp(Qt)` of one component.
    fn transition_matrix(&self, component: usize, time: f64) -> Vec<f64>;

    /// Per-site sequencing error probability, if the model carries one.
    fn dna_error_probability(&self, component: usize) -> Option<f64> {
        let _ = component;
        None
    }

    fn is_mixture(&self) -> bool {
        self.num_mixtures() > 1
    }

    /// `true` if any component carries a sequencing error probability.
    fn has_dna_error(&self) -> bool {
        (0..self.num_mixtures()).any(|c| self.dna_error_probability(c).is_some_and(|p| p > 0.0))
    }
}

/// `true` if all frequencies are equal within floating-point noise.
pub fn is_equal_frequencies(freqs: &[f64]) -> bool {
    match freqs.first() {
        Some(&first) => freqs.iter().all(|&f| (f - first).abs() < 1e-12),
        None => true,
    }
}
