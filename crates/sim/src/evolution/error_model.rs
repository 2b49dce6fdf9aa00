//! Sequencing-error model applied to tip sequences.

use crate::base::{is_gap, Sequence, State};
use crate::errors::SimulationError;
use crate::model::SiteProfile;
use rand::Rng;

/// Change `round(probability × sites.len())` of the given sites to a
/// different, uniformly chosen state.
///
/// Sites are drawn without replacement; a drawn gap is discarded and does
/// not count towards the total.
///
/// # Errors
/// `ErrorModelExhausted` if too many drawn sites were gaps to reach the
/// required count.
pub fn apply_sequencing_error<R: Rng + ?Sized>(
    rng: &mut R,
    sequence: &mut Sequence,
    mut sites: Vec<usize>,
    probability: f64,
    num_states: usize,
) -> Result<usize, SimulationError> {
    let needed = (probability * sites.len() as f64).round() as usize;
    let states = sequence.as_mut_slice();
    let mut changed = 0;
    while changed < needed {
        if needed - changed > sites.len() {
            return Err(SimulationError::ErrorModelExhausted {
                needed: needed - changed,
                available: sites.len(),
            });
        }
        let site = sites.swap_remove(rng.random_range(0..sites.len()));
        let Some(current) = states.get(site).copied() else {
            continue;
        };
        if is_gap(current) {
            continue;
        }
        let mut next = rng.random_range(0..num_states) as State;
        while next == current && num_states > 1 {
            next = rng.random_range(0..num_states) as State;
        }
        states[site] = next;
        changed += 1;
    }
    Ok(changed)
}

/// Apply the error model of every component to a tip.
///
/// `probabilities[c]` is the error rate of component `c`; each component
/// only touches its own sites.
///
/// # Errors
/// See [`apply_sequencing_error`].
pub fn apply_component_errors<R: Rng + ?Sized>(
    rng: &mut R,
    sequence: &mut Sequence,
    profile: &SiteProfile,
    probabilities: &[Option<f64>],
    num_states: usize,
) -> Result<usize, SimulationError> {
    let mut total = 0;
    for (component, probability) in probabilities.iter().enumerate() {
        let Some(p) = probability.filter(|p| *p > 0.0) else {
            continue;
        };
        let sites = if probabilities.len() > 1 {
            profile.sites_of_component(component)
        } else {
            (0..sequence.len()).collect()
        };
        total += apply_sequencing_error(rng, sequence, sites, p, num_states)?;
    }
    Ok(total)
}
