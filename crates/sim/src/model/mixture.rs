use super::reversible::{normalize_frequencies, ReversibleModel};
use super::SubstitutionModel;
use crate::errors::ModelError;

/// Weighted mixture of reversible models sharing one state space.
///
/// Each site evolves under one component, chosen from the weights when the
/// site profile is drawn (or per substitution event when mixing at the
/// substitution level).
#[derive(Debug, Clone)]
pub struct MixtureModel {
    name: String,
    components: Vec<ReversibleModel>,
    weights: Vec<f64>,
}

impl MixtureModel {
    /// # Errors
    /// Fails if the lists are empty or differ in length, a weight is not
    /// positive, or components disagree on the number of states.
    pub fn new(components: Vec<ReversibleModel>, weights: Vec<f64>) -> Result<Self, ModelError> {
        if components.is_empty() || components.len() != weights.len() {
            return Err(ModelError::InvalidWeights(format!(
                "{} components but {} weights",
                components.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| !(*w > 0.0) || !w.is_finite()) {
            return Err(ModelError::InvalidWeights(
                "weights must be positive and finite".into(),
            ));
        }
        let n = components[0].num_states();
        if components.iter().any(|c| c.num_states() != n) {
            return Err(ModelError::InconsistentMixture);
        }
        let weights = normalize_frequencies(&weights)?;
        let name = format!(
            "MIX{{{}}}",
            components
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(Self {
            name,
            components,
            weights,
        })
    }

    pub fn components(&self) -> &[ReversibleModel] {
        &self.components
    }
}

impl SubstitutionModel for MixtureModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_states(&self) -> usize {
        self.components[0].num_states()
    }

    fn num_mixtures(&self) -> usize {
        self.components.len()
    }

    fn mixture_weights(&self) -> Vec<f64> {
        self.weights.clone()
    }

    /// Weight-averaged component frequencies.
    fn state_frequencies(&self) -> Vec<f64> {
        let mut freqs = vec![0.0; self.num_states()];
        for (component, &w) in self.components.iter().zip(&self.weights) {
            for (acc, f) in freqs.iter_mut().zip(component.frequencies()) {
                *acc += w * f;
            }
        }
        freqs
    }

    fn component_frequencies(&self, component: usize) -> Vec<f64> {
        self.components[component].state_frequencies()
    }

    fn rate_matrix(&self, component: usize) -> Vec<f64> {
        self.components[component].rate_matrix(0)
    }

    fn transition_matrix(&self, component: usize, time: f64) -> Vec<f64> {
        self.components[component].transition_matrix(0, time)
    }

    fn dna_error_probability(&self, component: usize) -> Option<f64> {
        self.components[component].dna_error_probability(0)
    }
}
