//! Insertion and deletion parameters.
//!
//! Indels are a per-site Poisson process along each branch. Their rates are
//! relative to the substitution rate; the size of each event is drawn from
//! an [`IndelDistribution`]. Sizes are redrawn until they are positive, up to
//! [`MAX_SIZE_ATTEMPTS`] times.
//!
//! ## Size distributions
//! - `Geometric { p }`: `P(k) = (1-p)^(k-1) p`, mean `1/p`.
//! - `NegativeBinomial { r, q }`: one plus the number of failures before the
//!   `r`-th success, with failure probability `q` (Gamma-Poisson mixture).
//! - `Zipf { a, max }`: `P(k) ∝ k^-a` for `k` in `1..=max`.
//! - `Lavalette { a, max }`: `P(k) ∝ (k·max / (max - k + 1))^-a` for `k` in
//!   `1..=max`.
//! - `Empirical { sizes }`: uniform pick from a list of sizes.

use crate::base::{is_gap, State};
use crate::errors::{ConfigError, SimulationError};
use crate::sampling::{sample_accumulated, to_accumulated};
use rand::Rng;
use rand_distr::{Distribution, Gamma, Geometric, Poisson};
use serde::{Deserialize, Serialize};

/// Number of draws allowed to obtain a positive indel size.
pub const MAX_SIZE_ATTEMPTS: usize = 1000;

/// Distribution of insertion or deletion block sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndelDistribution {
    Geometric { p: f64 },
    NegativeBinomial { r: f64, q: f64 },
    Zipf { a: f64, max: usize },
    Lavalette { a: f64, max: usize },
    Empirical { sizes: Vec<u32> },
}

impl Default for IndelDistribution {
    /// Zipf with exponent 1.7, truncated at 100 sites.
    fn default() -> Self {
        IndelDistribution::Zipf { a: 1.7, max: 100 }
    }
}

impl IndelDistribution {
    /// # Errors
    /// `ConfigError::IndelDistribution` naming the offending parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::IndelDistribution(msg));
        match self {
            IndelDistribution::Geometric { p } if !(*p > 0.0 && *p <= 1.0) => {
                fail(format!("geometric p = {p} must be in (0, 1]"))
            }
            IndelDistribution::NegativeBinomial { r, q }
                if !(*r > 0.0 && r.is_finite()) || !(*q > 0.0 && *q < 1.0) =>
            {
                fail(format!(
                    "negative binomial needs r > 0 and q in (0, 1), got r = {r}, q = {q}"
                ))
            }
            IndelDistribution::Zipf { a, max } | IndelDistribution::Lavalette { a, max }
                if !(*a > 0.0 && a.is_finite()) || *max == 0 =>
            {
                fail(format!("power-law needs a > 0 and max >= 1, got a = {a}, max = {max}"))
            }
            IndelDistribution::Empirical { sizes } if sizes.is_empty() => {
                fail("empirical distribution has no sizes".into())
            }
            _ => Ok(()),
        }
    }
}

/// Prepared sampler for one [`IndelDistribution`].
#[derive(Debug, Clone)]
pub enum IndelSizeSampler {
    Geometric(Geometric),
    NegativeBinomial(Gamma<f64>),
    /// Accumulated probabilities of sizes `1..=max`.
    Table(Vec<f64>),
    Empirical(Vec<u32>),
}

impl IndelSizeSampler {
    /// # Errors
    /// Fails if the distribution parameters are invalid.
    pub fn new(distribution: &IndelDistribution) -> Result<Self, ConfigError> {
        distribution.validate()?;
        let invalid = |e: String| ConfigError::IndelDistribution(e);
        Ok(match distribution {
            IndelDistribution::Geometric { p } => {
                IndelSizeSampler::Geometric(Geometric::new(*p).map_err(|e| invalid(e.to_string()))?)
            }
            IndelDistribution::NegativeBinomial { r, q } => IndelSizeSampler::NegativeBinomial(
                Gamma::new(*r, q / (1.0 - q)).map_err(|e| invalid(e.to_string()))?,
            ),
            IndelDistribution::Zipf { a, max } => {
                IndelSizeSampler::Table(power_law_table(*max, |k| k.powf(-a)))
            }
            IndelDistribution::Lavalette { a, max } => {
                let m = *max as f64;
                IndelSizeSampler::Table(power_law_table(*max, |k| (k * m / (m - k + 1.0)).powf(-a)))
            }
            IndelDistribution::Empirical { sizes } => IndelSizeSampler::Empirical(sizes.clone()),
        })
    }

    /// One raw draw; may be zero for the empirical distribution.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match self {
            IndelSizeSampler::Geometric(geo) => geo.sample(rng) as usize + 1,
            IndelSizeSampler::NegativeBinomial(gamma) => {
                let lambda = gamma.sample(rng);
                let failures = match Poisson::new(lambda) {
                    Ok(poisson) => poisson.sample(rng) as usize,
                    Err(_) => 0,
                };
                failures + 1
            }
            IndelSizeSampler::Table(acc) => {
                sample_accumulated(rng, acc, 0, acc.len()).map_or(0, |i| i + 1)
            }
            IndelSizeSampler::Empirical(sizes) => sizes[rng.random_range(0..sizes.len())] as usize,
        }
    }

    /// Redraw until the size is positive.
    ///
    /// # Errors
    /// `IndelLengthExhausted` after [`MAX_SIZE_ATTEMPTS`] non-positive draws.
    pub fn draw_positive<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize, SimulationError> {
        for _ in 0..MAX_SIZE_ATTEMPTS {
            let size = self.draw(rng);
            if size > 0 {
                return Ok(size);
            }
        }
        Err(SimulationError::IndelLengthExhausted(MAX_SIZE_ATTEMPTS))
    }
}

fn power_law_table(max: usize, weight: impl Fn(f64) -> f64) -> Vec<f64> {
    let mut acc: Vec<f64> = (1..=max).map(|k| weight(k as f64)).collect();
    to_accumulated(&mut acc, 1, max);
    acc
}

/// Rates and size samplers of the indel process.
#[derive(Debug, Clone)]
pub struct IndelModel {
    insertion_rate: f64,
    deletion_rate: f64,
    insertion: IndelSizeSampler,
    deletion: IndelSizeSampler,
    mean_deletion_size: Option<f64>,
}

impl IndelModel {
    /// # Errors
    /// Fails on negative or non-finite rates and on invalid distributions.
    pub fn new(
        insertion_rate: f64,
        deletion_rate: f64,
        insertion: &IndelDistribution,
        deletion: &IndelDistribution,
    ) -> Result<Self, ConfigError> {
        for (what, rate) in [("insertion", insertion_rate), ("deletion", deletion_rate)] {
            if !(rate >= 0.0 && rate.is_finite()) {
                return Err(ConfigError::InvalidParameter(format!(
                    "{what} rate {rate} must be finite and non-negative"
                )));
            }
        }
        Ok(Self {
            insertion_rate,
            deletion_rate,
            insertion: IndelSizeSampler::new(insertion)?,
            deletion: IndelSizeSampler::new(deletion)?,
            mean_deletion_size: None,
        })
    }

    /// No indels at all.
    pub fn disabled() -> Self {
        let default = IndelSizeSampler::Table(vec![1.0]);
        Self {
            insertion_rate: 0.0,
            deletion_rate: 0.0,
            insertion: default.clone(),
            deletion: default,
            mean_deletion_size: None,
        }
    }

    #[inline]
    pub fn insertion_rate(&self) -> f64 {
        self.insertion_rate
    }

    #[inline]
    pub fn deletion_rate(&self) -> f64 {
        self.deletion_rate
    }

    /// `true` if either rate is positive.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.insertion_rate + self.deletion_rate > 0.0
    }

    #[inline]
    pub fn has_insertions(&self) -> bool {
        self.insertion_rate > 0.0
    }

    pub fn draw_insertion_size<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize, SimulationError> {
        self.insertion.draw_positive(rng)
    }

    pub fn draw_deletion_size<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize, SimulationError> {
        self.deletion.draw_positive(rng)
    }

    /// Mean deletion size, estimated once from `sample_size` draws and
    /// cached for the rest of the run.
    ///
    /// Non-positive draws are ignored.
    ///
    /// # Errors
    /// `MeanDeletionSize` if no draw was positive.
    pub fn mean_deletion_size<R: Rng + ?Sized>(
        &mut self,
        sample_size: usize,
        rng: &mut R,
    ) -> Result<f64, SimulationError> {
        if let Some(mean) = self.mean_deletion_size {
            return Ok(mean);
        }
        let (total, count) = (0..sample_size)
            .map(|_| self.deletion.draw(rng))
            .filter(|&size| size > 0)
            .fold((0usize, 0usize), |(t, c), size| (t + size, c + 1));
        if count == 0 {
            return Err(SimulationError::MeanDeletionSize);
        }
        let mean = total as f64 / count as f64;
        self.mean_deletion_size = Some(mean);
        Ok(mean)
    }
}

/// Draw a position in `[0, upper)` that is not a deleted site.
///
/// Index `sequence.len()` (append) counts as valid. Up to `upper` uniform
/// candidates are drawn; a deleted candidate moves forward to the next real
/// site while staying below `upper`. When every attempt fails, one of the
/// valid positions below `upper` is picked uniformly.
///
/// # Errors
/// `NoValidPosition` if every position below `upper` is a deleted site.
pub fn select_valid_position<R: Rng + ?Sized>(
    rng: &mut R,
    upper: usize,
    sequence: &[State],
) -> Result<usize, SimulationError> {
    let valid = |p: usize| p == sequence.len() || (p < sequence.len() && !is_gap(sequence[p]));
    let no_position = || SimulationError::NoValidPosition {
        upper_bound: upper,
        len: sequence.len(),
    };
    if upper == 0 {
        return Err(no_position());
    }

    for _ in 0..upper {
        let mut position = rng.random_range(0..upper);
        while position < upper && !valid(position) {
            position += 1;
        }
        if position < upper {
            return Ok(position);
        }
    }

    let candidates: Vec<usize> = (0..upper).filter(|&p| valid(p)).collect();
    if candidates.is_empty() {
        return Err(no_position());
    }
    Ok(candidates[rng.random_range(0..candidates.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::STATE_UNKNOWN;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    const G: State = STATE_UNKNOWN;

    fn mean_of(sampler: &IndelSizeSampler, n: usize, seed: u64) -> f64 {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        (0..n).map(|_| sampler.draw(&mut rng) as f64).sum::<f64>() / n as f64
    }

    #[test]
    fn test_geometric_mean() {
        let s = IndelSizeSampler::new(&IndelDistribution::Geometric { p: 0.25 }).unwrap();
        let mean = mean_of(&s, 50_000, 1);
        assert!((mean - 4.0).abs() < 0.1, "{mean}");
    }

    #[test]
    fn test_negative_binomial_mean() {
        // mean = 1 + r q / (1 - q)
        let s = IndelSizeSampler::new(&IndelDistribution::NegativeBinomial { r: 2.0, q: 0.5 })
            .unwrap();
        let mean = mean_of(&s, 50_000, 2);
        assert!((mean - 3.0).abs() < 0.1, "{mean}");
    }

    #[test]
    fn test_power_law_tables_stay_in_range() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        for dist in [
            IndelDistribution::Zipf { a: 1.7, max: 50 },
            IndelDistribution::Lavalette { a: 1.1, max: 50 },
        ] {
            let s = IndelSizeSampler::new(&dist).unwrap();
            let draws: Vec<usize> = (0..10_000).map(|_| s.draw(&mut rng)).collect();
            assert!(draws.iter().all(|&d| (1..=50).contains(&d)));
            // small blocks dominate
            let ones = draws.iter().filter(|&&d| d == 1).count();
            assert!(ones > 2_000, "{dist:?}: {ones}");
        }
    }

    #[test]
    fn test_empirical_zero_sizes_exhaust() {
        let s = IndelSizeSampler::new(&IndelDistribution::Empirical { sizes: vec![0] }).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        assert!(matches!(
            s.draw_positive(&mut rng),
            Err(SimulationError::IndelLengthExhausted(MAX_SIZE_ATTEMPTS))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        assert!(IndelDistribution::Geometric { p: 0.0 }.validate().is_err());
        assert!(IndelDistribution::NegativeBinomial { r: 1.0, q: 1.0 }.validate().is_err());
        assert!(IndelDistribution::Zipf { a: 1.5, max: 0 }.validate().is_err());
        assert!(IndelDistribution::Empirical { sizes: vec![] }.validate().is_err());
        assert!(IndelDistribution::default().validate().is_ok());
        assert!(IndelModel::new(-0.1, 0.0, &Default::default(), &Default::default()).is_err());
    }

    #[test]
    fn test_mean_deletion_size_is_cached() {
        let dist = IndelDistribution::Empirical { sizes: vec![0, 2, 4] };
        let mut model = IndelModel::new(0.1, 0.1, &dist, &dist).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let mean = model.mean_deletion_size(5_000, &mut rng).unwrap();
        assert!((mean - 3.0).abs() < 0.1);
        // a second call makes no draws
        let mut other = Xoshiro256PlusPlus::seed_from_u64(99);
        assert_eq!(model.mean_deletion_size(10, &mut other).unwrap(), mean);
    }

    #[test]
    fn test_mean_deletion_size_fails_without_positive_draws() {
        let dist = IndelDistribution::Empirical { sizes: vec![0] };
        let mut model = IndelModel::new(0.0, 0.1, &dist, &dist).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(6);
        assert!(matches!(
            model.mean_deletion_size(100, &mut rng),
            Err(SimulationError::MeanDeletionSize)
        ));
    }

    #[test]
    fn test_valid_position_skips_gaps() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let seq = [G, G, 1, G, 0];
        for _ in 0..500 {
            let p = select_valid_position(&mut rng, 6, &seq).unwrap();
            assert!(p == 2 || p == 4 || p == 5, "{p}");
        }
    }

    #[test]
    fn test_valid_position_respects_bound() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
        let seq = [0, G, G, G, 1];
        for _ in 0..500 {
            assert_eq!(select_valid_position(&mut rng, 3, &seq).unwrap(), 0);
        }
    }

    #[test]
    fn test_valid_position_all_deleted() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let seq = [G, G, G, 2];
        assert!(matches!(
            select_valid_position(&mut rng, 3, &seq),
            Err(SimulationError::NoValidPosition { upper_bound: 3, len: 4 })
        ));
        // appending is always possible
        assert_eq!(select_valid_position(&mut rng, 4, &[G, G, G]).unwrap(), 3);
    }
}
