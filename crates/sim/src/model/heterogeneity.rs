//! Among-site rate heterogeneity and per-site model assignment.
//!
//! A [`RateHeterogeneity`] strategy is chosen once per run. It is turned into
//! a [`SiteProfile`] holding, for every site, a relative rate, a discrete
//! class (rate category or heterotachy class) and a mixture component. The
//! profile is spliced together with the sequences on insertion so that site
//! `i` always refers to the same alignment column.

use super::gamma::discrete_gamma_rates;
use crate::errors::ConfigError;
use crate::sampling::{argmax, sample_accumulated_max_first, to_accumulated};
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};

/// How relative rates (and heterotachy classes) are assigned to sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateHeterogeneity {
    /// Every site evolves at rate one.
    #[default]
    Uniform,

    /// A proportion of sites never changes; the rest share one rate,
    /// rescaled so that the mean rate stays one.
    Invariant { proportion: f64 },

    /// Discrete categories (discrete gamma or free rates), optionally with
    /// invariant sites.
    Discrete {
        rates: Vec<f64>,
        weights: Vec<f64>,
        #[serde(default)]
        invariant: f64,
    },

    /// One gamma-distributed rate per site, optionally with invariant sites.
    ContinuousGamma {
        shape: f64,
        #[serde(default)]
        invariant: f64,
    },

    /// Each site belongs to one class; every edge carries one length per
    /// class.
    Heterotachy { weights: Vec<f64> },
}

impl RateHeterogeneity {
    /// Discrete gamma with equiprobable categories (mean rate per category).
    pub fn discrete_gamma(shape: f64, categories: usize, invariant: f64) -> Self {
        let rates = discrete_gamma_rates(shape, categories.max(1));
        let weights = vec![1.0 / rates.len() as f64; rates.len()];
        RateHeterogeneity::Discrete {
            rates,
            weights,
            invariant,
        }
    }

    /// Free-rate model: user-supplied category rates and weights.
    pub fn free_rate(rates: Vec<f64>, weights: Vec<f64>, invariant: f64) -> Self {
        RateHeterogeneity::Discrete {
            rates,
            weights,
            invariant,
        }
    }

    /// # Errors
    /// `ConfigError::InvalidParameter` for proportions outside `[0, 1)`,
    /// non-positive shapes, or mismatched/invalid category tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check_invariant = |p: f64| {
            if (0.0..1.0).contains(&p) {
                Ok(())
            } else {
                Err(ConfigError::InvalidParameter(format!(
                    "invariant proportion {p} must be in [0, 1)"
                )))
            }
        };
        match self {
            RateHeterogeneity::Uniform => Ok(()),
            RateHeterogeneity::Invariant { proportion } => check_invariant(*proportion),
            RateHeterogeneity::Discrete {
                rates,
                weights,
                invariant,
            } => {
                check_invariant(*invariant)?;
                if rates.is_empty() || rates.len() != weights.len() {
                    return Err(ConfigError::InvalidParameter(format!(
                        "{} category rates but {} weights",
                        rates.len(),
                        weights.len()
                    )));
                }
                if rates.iter().any(|r| !r.is_finite() || *r < 0.0)
                    || weights.iter().any(|w| !w.is_finite() || *w <= 0.0)
                {
                    return Err(ConfigError::InvalidParameter(
                        "category rates must be non-negative and weights positive".into(),
                    ));
                }
                Ok(())
            }
            RateHeterogeneity::ContinuousGamma { shape, invariant } => {
                check_invariant(*invariant)?;
                if !(*shape > 0.0) || !shape.is_finite() {
                    return Err(ConfigError::InvalidParameter(format!(
                        "gamma shape {shape} must be positive"
                    )));
                }
                Ok(())
            }
            RateHeterogeneity::Heterotachy { weights } => {
                if weights.is_empty() || weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                    return Err(ConfigError::InvalidParameter(
                        "heterotachy weights must be positive".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn is_heterotachy(&self) -> bool {
        matches!(self, RateHeterogeneity::Heterotachy { .. })
    }

    /// `true` when every site draws its own rate.
    pub fn is_continuous(&self) -> bool {
        matches!(self, RateHeterogeneity::ContinuousGamma { .. })
    }

    /// Number of branch lengths each edge must carry.
    pub fn num_length_classes(&self) -> usize {
        match self {
            RateHeterogeneity::Heterotachy { weights } => weights.len(),
            _ => 1,
        }
    }

    fn invariant_proportion(&self) -> f64 {
        match self {
            RateHeterogeneity::Invariant { proportion } => *proportion,
            RateHeterogeneity::Discrete { invariant, .. }
            | RateHeterogeneity::ContinuousGamma { invariant, .. } => *invariant,
            _ => 0.0,
        }
    }
}

/// Sampler prepared from a strategy and mixture weights.
#[derive(Debug, Clone)]
struct ProfileSampler {
    strategy: RateHeterogeneity,
    class_acc: Vec<f64>,
    class_hint: usize,
    mixture_acc: Vec<f64>,
    mixture_hint: usize,
    gamma: Option<Gamma<f64>>,
}

impl ProfileSampler {
    fn new(strategy: &RateHeterogeneity, mixture_weights: &[f64]) -> Result<Self, ConfigError> {
        strategy.validate()?;
        let class_weights: Vec<f64> = match strategy {
            RateHeterogeneity::Discrete { weights, .. }
            | RateHeterogeneity::Heterotachy { weights } => weights.clone(),
            _ => Vec::new(),
        };
        let class_hint = argmax(&class_weights);
        let mut class_acc = class_weights;
        let len = class_acc.len();
        to_accumulated(&mut class_acc, 1, len);

        let mixture_hint = argmax(mixture_weights);
        let mut mixture_acc = mixture_weights.to_vec();
        let len = mixture_acc.len();
        to_accumulated(&mut mixture_acc, 1, len);

        let gamma = match strategy {
            RateHeterogeneity::ContinuousGamma { shape, .. } => Some(
                Gamma::new(*shape, 1.0 / *shape)
                    .map_err(|e| ConfigError::InvalidParameter(format!("gamma rates: {e}")))?,
            ),
            _ => None,
        };

        Ok(Self {
            strategy: strategy.clone(),
            class_acc,
            class_hint,
            mixture_acc,
            mixture_hint,
            gamma,
        })
    }

    /// Draw `(rate, class)` for one site.
    fn draw_site<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, u16) {
        let p_inv = self.strategy.invariant_proportion();
        if p_inv > 0.0 && rng.random::<f64>() < p_inv {
            return (0.0, 0);
        }
        let scale = 1.0 / (1.0 - p_inv);
        match &self.strategy {
            RateHeterogeneity::Uniform => (1.0, 0),
            RateHeterogeneity::Invariant { .. } => (scale, 0),
            RateHeterogeneity::Discrete { rates, .. } => {
                let k = self.draw_class(rng);
                (rates[k] * scale, k as u16)
            }
            RateHeterogeneity::ContinuousGamma { .. } => {
                let rate = self.gamma.as_ref().map_or(1.0, |g| g.sample(rng));
                (rate * scale, 0)
            }
            RateHeterogeneity::Heterotachy { .. } => (1.0, self.draw_class(rng) as u16),
        }
    }

    fn draw_class<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let n = self.class_acc.len();
        sample_accumulated_max_first(rng, &self.class_acc, 0, n, self.class_hint).unwrap_or(0)
    }

    fn draw_component<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let n = self.mixture_acc.len();
        sample_accumulated_max_first(rng, &self.mixture_acc, 0, n, self.mixture_hint).unwrap_or(0)
    }

    fn has_rates(&self) -> bool {
        !matches!(
            self.strategy,
            RateHeterogeneity::Uniform | RateHeterogeneity::Heterotachy { .. }
        )
    }

    fn has_classes(&self) -> bool {
        matches!(
            self.strategy,
            RateHeterogeneity::Discrete { .. } | RateHeterogeneity::Heterotachy { .. }
        )
    }

    fn has_components(&self) -> bool {
        self.mixture_acc.len() > 1
    }
}

/// Per-site rate, class and mixture component.
///
/// Vectors that would be constant (no heterogeneity, no mixture) are not
/// stored; the accessors then return the neutral value.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    sampler: ProfileSampler,
    rates: Option<Vec<f64>>,
    classes: Option<Vec<u16>>,
    components: Option<Vec<u16>>,
    len: usize,
}

impl SiteProfile {
    /// Draw the profile of `len` sites.
    ///
    /// # Errors
    /// Returns `ConfigError` if the strategy is invalid.
    pub fn draw<R: Rng + ?Sized>(
        strategy: &RateHeterogeneity,
        mixture_weights: &[f64],
        len: usize,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        let sampler = ProfileSampler::new(strategy, mixture_weights)?;
        let mut profile = Self {
            rates: sampler.has_rates().then(|| Vec::with_capacity(len)),
            classes: sampler.has_classes().then(|| Vec::with_capacity(len)),
            components: sampler.has_components().then(|| Vec::with_capacity(len)),
            sampler,
            len: 0,
        };
        profile.insert_sites(0, len, rng);
        Ok(profile)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Relative rate of site `i`.
    #[inline]
    pub fn rate(&self, i: usize) -> f64 {
        self.rates.as_ref().map_or(1.0, |r| r[i])
    }

    /// Rate category or heterotachy class of site `i`.
    #[inline]
    pub fn class(&self, i: usize) -> usize {
        self.classes.as_ref().map_or(0, |c| c[i] as usize)
    }

    /// Mixture component of site `i`.
    #[inline]
    pub fn component(&self, i: usize) -> usize {
        self.components.as_ref().map_or(0, |c| c[i] as usize)
    }

    /// `true` when the profile carries per-site mixture components.
    pub fn has_components(&self) -> bool {
        self.components.is_some()
    }

    /// Draw a mixture component from the weights, for mixing at the
    /// substitution level.
    pub fn draw_component<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.sampler.draw_component(rng)
    }

    /// Draw fresh values for `count` new sites inserted before `position`.
    pub fn insert_sites<R: Rng + ?Sized>(&mut self, position: usize, count: usize, rng: &mut R) {
        let mut rates = Vec::with_capacity(count);
        let mut classes = Vec::with_capacity(count);
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let (rate, class) = self.sampler.draw_site(rng);
            rates.push(rate);
            classes.push(class);
            if self.components.is_some() {
                components.push(self.sampler.draw_component(rng) as u16);
            }
        }
        if let Some(r) = self.rates.as_mut() {
            r.splice(position..position, rates);
        }
        if let Some(c) = self.classes.as_mut() {
            c.splice(position..position, classes);
        }
        if let Some(c) = self.components.as_mut() {
            c.splice(position..position, components);
        }
        self.len += count;
    }

    /// Keep only the sites whose index is in `keep` (sorted ascending).
    pub fn retain_sites(&mut self, keep: &[usize]) {
        fn pick<T: Copy>(v: &mut Option<Vec<T>>, keep: &[usize]) {
            if let Some(values) = v.as_mut() {
                *values = keep.iter().map(|&i| values[i]).collect();
            }
        }
        pick(&mut self.rates, keep);
        pick(&mut self.classes, keep);
        pick(&mut self.components, keep);
        self.len = keep.len();
    }

    /// Indices of the sites assigned to `component`.
    pub fn sites_of_component(&self, component: usize) -> Vec<usize> {
        match &self.components {
            Some(c) => (0..self.len).filter(|&i| c[i] as usize == component).collect(),
            None => (0..self.len).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_uniform_profile_stores_nothing() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let p = SiteProfile::draw(&RateHeterogeneity::Uniform, &[1.0], 100, &mut rng).unwrap();
        assert_eq!(p.len(), 100);
        assert!(p.rates.is_none() && p.classes.is_none() && p.components.is_none());
        assert_eq!(p.rate(42), 1.0);
        assert_eq!(p.component(42), 0);
    }

    #[test]
    fn test_invariant_proportion_and_mean_rate() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let strategy = RateHeterogeneity::Invariant { proportion: 0.3 };
        let p = SiteProfile::draw(&strategy, &[1.0], 20_000, &mut rng).unwrap();
        let invariant = (0..p.len()).filter(|&i| p.rate(i) == 0.0).count();
        let frac = invariant as f64 / p.len() as f64;
        assert!((frac - 0.3).abs() < 0.02, "{frac}");
        let mean = (0..p.len()).map(|i| p.rate(i)).sum::<f64>() / p.len() as f64;
        assert!((mean - 1.0).abs() < 0.03, "{mean}");
    }

    #[test]
    fn test_discrete_categories_follow_weights() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let strategy = RateHeterogeneity::free_rate(vec![0.5, 2.0], vec![0.75, 0.25], 0.0);
        let p = SiteProfile::draw(&strategy, &[1.0], 20_000, &mut rng).unwrap();
        let slow = (0..p.len()).filter(|&i| p.class(i) == 0).count() as f64 / 20_000.0;
        assert!((slow - 0.75).abs() < 0.02);
        for i in 0..p.len() {
            let expected = if p.class(i) == 0 { 0.5 } else { 2.0 };
            assert_eq!(p.rate(i), expected);
        }
    }

    #[test]
    fn test_continuous_gamma_mean() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let strategy = RateHeterogeneity::ContinuousGamma {
            shape: 0.5,
            invariant: 0.0,
        };
        let p = SiteProfile::draw(&strategy, &[1.0], 50_000, &mut rng).unwrap();
        let mean = (0..p.len()).map(|i| p.rate(i)).sum::<f64>() / p.len() as f64;
        assert!((mean - 1.0).abs() < 0.05, "{mean}");
        assert!(strategy.is_continuous());
    }

    #[test]
    fn test_mixture_components_and_insertion() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let mut p =
            SiteProfile::draw(&RateHeterogeneity::Uniform, &[0.5, 0.5], 10, &mut rng).unwrap();
        assert!(p.has_components());
        let before: Vec<usize> = (0..10).map(|i| p.component(i)).collect();
        p.insert_sites(4, 3, &mut rng);
        assert_eq!(p.len(), 13);
        let after: Vec<usize> = (0..13).map(|i| p.component(i)).collect();
        assert_eq!(&after[..4], &before[..4]);
        assert_eq!(&after[7..], &before[4..]);
        let total: usize = (0..2).map(|c| p.sites_of_component(c).len()).sum();
        assert_eq!(total, 13);
    }

    #[test]
    fn test_retain_sites() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let strategy = RateHeterogeneity::discrete_gamma(0.5, 4, 0.0);
        let mut p = SiteProfile::draw(&strategy, &[1.0], 10, &mut rng).unwrap();
        let kept: Vec<f64> = [1, 3, 8].iter().map(|&i| p.rate(i)).collect();
        p.retain_sites(&[1, 3, 8]);
        assert_eq!(p.len(), 3);
        assert_eq!((0..3).map(|i| p.rate(i)).collect::<Vec<_>>(), kept);
    }

    #[test]
    fn test_validate() {
        assert!(RateHeterogeneity::Invariant { proportion: 1.0 }.validate().is_err());
        assert!(RateHeterogeneity::free_rate(vec![1.0], vec![], 0.0).validate().is_err());
        assert!(RateHeterogeneity::ContinuousGamma { shape: 0.0, invariant: 0.0 }
            .validate()
            .is_err());
        assert!(RateHeterogeneity::Heterotachy { weights: vec![0.5, 0.5] }
            .validate()
            .is_ok());
        assert_eq!(
            RateHeterogeneity::Heterotachy { weights: vec![0.5, 0.5] }.num_length_classes(),
            2
        );
    }

    #[test]
    fn test_strategy_serde() {
        let s: RateHeterogeneity =
            serde_json::from_str(r#"{"kind":"continuous_gamma","shape":0.8}"#).unwrap();
        assert_eq!(
            s,
            RateHeterogeneity::ContinuousGamma {
                shape: 0.8,
                invariant: 0.0
            }
        );
    }
}
