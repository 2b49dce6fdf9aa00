//! FunDi site permutation.
//!
//! The functional-divergence model shuffles a fixed set of alignment columns
//! in a chosen subset of taxa, so that those taxa evolved the selected sites
//! under a different assignment of site-specific processes. The permutation
//! is drawn once per run and applied to every listed taxon.

use crate::base::Sequence;
use crate::errors::{ConfigError, SimulationError};
use rand::Rng;
use std::collections::HashSet;

/// Draws allowed per selected site or target position.
const MAX_ATTEMPTS: usize = 1000;

/// One move of the permutation: the state at `site` goes to `new_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunDiMove {
    pub site: usize,
    pub new_position: usize,
}

/// The permutation and the taxa it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunDiPermutation {
    moves: Vec<FunDiMove>,
    taxa: HashSet<String>,
}

impl FunDiPermutation {
    /// Select `round(proportion × num_sites)` distinct sites and a
    /// permutation among them that moves every site.
    ///
    /// # Errors
    /// `ConfigError::FunDiProportion` if `proportion` is outside `(0, 1)`,
    /// and `SimulationError::FunDiSelection` if fewer than two sites are
    /// selected or a draw keeps colliding.
    pub fn draw<R: Rng + ?Sized>(
        rng: &mut R,
        proportion: f64,
        num_sites: usize,
        taxa: impl IntoIterator<Item = String>,
    ) -> Result<Self, SimulationError> {
        if !(proportion > 0.0 && proportion < 1.0) {
            return Err(ConfigError::FunDiProportion(proportion).into());
        }
        let count = (proportion * num_sites as f64).round() as usize;
        if count < 2 {
            return Err(SimulationError::FunDiSelection(format!(
                "{count} site(s) selected out of {num_sites}; at least two are needed to permute"
            )));
        }

        let mut selected: Vec<usize> = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for i in 0..count {
            for _ in 0..MAX_ATTEMPTS {
                let site = rng.random_range(0..num_sites);
                if seen.insert(site) {
                    selected.push(site);
                    break;
                }
            }
            if selected.len() <= i {
                return Err(SimulationError::FunDiSelection(format!(
                    "no new site found after {MAX_ATTEMPTS} attempts"
                )));
            }
        }

        let mut pool = selected.clone();
        let mut moves = Vec::with_capacity(count);
        for &site in &selected[..count - 1] {
            let mut placed = false;
            for _ in 0..MAX_ATTEMPTS {
                let k = rng.random_range(0..pool.len());
                if pool[k] != site {
                    moves.push(FunDiMove {
                        site,
                        new_position: pool.remove(k),
                    });
                    placed = true;
                    break;
                }
            }
            if !placed {
                return Err(SimulationError::FunDiSelection(format!(
                    "no new position for site {site} after {MAX_ATTEMPTS} attempts"
                )));
            }
        }

        // one position left; swap with the first move if it would stay put
        let last = selected[count - 1];
        let remaining = pool[0];
        if remaining != last {
            moves.push(FunDiMove {
                site: last,
                new_position: remaining,
            });
        } else {
            let first = moves[0].new_position;
            moves[0].new_position = remaining;
            moves.push(FunDiMove {
                site: last,
                new_position: first,
            });
        }

        Ok(Self {
            moves,
            taxa: taxa.into_iter().collect(),
        })
    }

    pub fn moves(&self) -> &[FunDiMove] {
        &self.moves
    }

    /// `true` if `name` is one of the permuted taxa.
    pub fn applies_to(&self, name: &str) -> bool {
        self.taxa.contains(name)
    }

    /// Permute `sequence` in place if `name` is a listed taxon.
    ///
    /// Returns whether the sequence changed hands.
    pub fn apply(&self, name: &str, sequence: &mut Sequence) -> bool {
        if !self.applies_to(name) {
            return false;
        }
        let states = sequence.as_mut_slice();
        let cached: Vec<_> = self
            .moves
            .iter()
            .map(|m| states.get(m.site).copied())
            .collect();
        for (m, state) in self.moves.iter().zip(cached) {
            if let (Some(state), Some(slot)) = (state, states.get_mut(m.new_position)) {
                *slot = state;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::State;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_every_selected_site_moves() {
        for seed in 0..50 {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let p = FunDiPermutation::draw(&mut rng, 0.1, 100, vec!["A".to_string()]).unwrap();
            assert_eq!(p.moves().len(), 10);
            let sites: HashSet<usize> = p.moves().iter().map(|m| m.site).collect();
            let targets: HashSet<usize> = p.moves().iter().map(|m| m.new_position).collect();
            assert_eq!(sites, targets);
            assert!(p.moves().iter().all(|m| m.site != m.new_position));
        }
    }

    #[test]
    fn test_apply_only_to_listed_taxa() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let p = FunDiPermutation::draw(&mut rng, 0.5, 20, vec!["A".to_string()]).unwrap();
        let original: Sequence = (0..20).map(|i| i as State).collect();

        let mut other = original.clone();
        assert!(!p.apply("B", &mut other));
        assert_eq!(other, original);

        let mut seq = original.clone();
        assert!(p.apply("A", &mut seq));
        for m in p.moves() {
            assert_eq!(seq.get(m.new_position), original.get(m.site));
        }
        let mut sorted = seq.into_states();
        sorted.sort_unstable();
        assert_eq!(sorted, original.into_states());
    }

    #[test]
    fn test_invalid_proportion_and_too_few_sites() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        assert!(matches!(
            FunDiPermutation::draw(&mut rng, 1.0, 10, Vec::new()),
            Err(SimulationError::Config(ConfigError::FunDiProportion(_)))
        ));
        assert!(matches!(
            FunDiPermutation::draw(&mut rng, 0.01, 10, Vec::new()),
            Err(SimulationError::FunDiSelection(_))
        ));
    }
}
