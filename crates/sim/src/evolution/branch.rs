//! Per-edge simulation: method choice and transition-matrix sampling.
//!
//! Long branches are cheapest to simulate in one step from `P(t)`; short
//! ones from the rate matrix, where only the few sites that actually change
//! cost anything. The switch point is a branch length threshold that
//! shrinks with the sequence length (see [`switching_threshold`]).

use super::events::SimulationMethod;
use crate::base::{is_gap, Sequence, State, STATE_UNKNOWN};
use crate::errors::SimulationError;
use crate::model::{SiteProfile, SubstitutionModel};
use crate::sampling::{sample_accumulated_max_first, to_accumulated};
use crate::tree::Edge;
use rand::Rng;
use std::collections::HashMap;

/// Branch length (in expected substitutions per site, after scaling) above
/// which the transition-matrix method is used, for `sequence_length` sites.
///
/// The constants were fitted on run times; continuous gamma rates make
/// every site need its own matrix, which moves the break-even point.
pub fn switching_threshold(sequence_length: usize, continuous_gamma: bool) -> f64 {
    let a = match (continuous_gamma, sequence_length) {
        (true, l) if l >= 1_000_000 => 6.0,
        (true, l) if l >= 500_000 => 7.0,
        (true, l) if l >= 100_000 => 9.1,
        (true, _) => 13.3073605,
        (false, l) if l >= 1_000_000 => 1.0,
        (false, l) if l >= 500_000 => 1.1,
        (false, l) if l >= 100_000 => 1.4,
        (false, _) => 2.226224503,
    };
    a / sequence_length.max(1) as f64
}

/// Run-wide switches that decide how an edge is simulated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchSettings {
    pub branch_scale: f64,
    pub partition_rate: f64,
    pub mixture_at_sub_level: bool,
    pub heterotachy: bool,
    pub continuous_gamma: bool,
}

impl Default for BranchSettings {
    fn default() -> Self {
        Self {
            branch_scale: 1.0,
            partition_rate: 1.0,
            mixture_at_sub_level: false,
            heterotachy: false,
            continuous_gamma: false,
        }
    }
}

/// Pick the method for `edge`.
///
/// Heterotachy and branch-specific models always go through `P(t)`. A
/// mixture drawn per substitution needs the event loop, so it never
/// switches on length alone.
pub fn select_method(
    edge: &Edge,
    threshold: f64,
    settings: &BranchSettings,
    model_is_mixture: bool,
) -> SimulationMethod {
    let long = edge.length * settings.branch_scale > threshold
        && !(model_is_mixture && settings.mixture_at_sub_level);
    if long || settings.heterotachy || edge.model.is_some() {
        SimulationMethod::TransProbMatrix
    } else {
        SimulationMethod::RateMatrix
    }
}

/// Accumulated `P(t)` matrices of one edge, keyed by
/// `(component, class, rate)`.
struct MatrixCache<'m> {
    model: &'m dyn SubstitutionModel,
    num_states: usize,
    matrices: HashMap<(usize, usize, u64), Vec<f64>>,
}

impl<'m> MatrixCache<'m> {
    fn new(model: &'m dyn SubstitutionModel) -> Self {
        Self {
            model,
            num_states: model.num_states(),
            matrices: HashMap::new(),
        }
    }

    fn compute(&self, component: usize, time: f64) -> Vec<f64> {
        accumulated_matrix(self.model, self.num_states, component, time)
    }

    fn get(&mut self, component: usize, class: usize, rate: f64, time: f64) -> &[f64] {
        let (model, n) = (self.model, self.num_states);
        self.matrices
            .entry((component, class, rate.to_bits()))
            .or_insert_with(|| accumulated_matrix(model, n, component, time))
    }
}

/// `P(t)` of `component` with every row replaced by its running sum.
fn accumulated_matrix(
    model: &dyn SubstitutionModel,
    num_states: usize,
    component: usize,
    time: f64,
) -> Vec<f64> {
    let mut p = model.transition_matrix(component, time);
    to_accumulated(&mut p, num_states, num_states);
    p
}

/// Sample a child sequence from `parent` along `edge` in one step.
///
/// Each real site draws its new state from row `parent_state` of the
/// accumulated `P(t)` of its component, rate and (under heterotachy) class
/// length, where `t = partition_rate × branch_scale × length × rate`. Gaps
/// are inherited and sites with rate zero keep the parent state.
///
/// With a branch-specific `model` holding a single component, every site
/// uses that component.
///
/// # Errors
/// `SamplingFailed` if a matrix row does not cover its draw (NaN entries).
pub fn sample_from_transition_matrix<R: Rng + ?Sized>(
    model: &dyn SubstitutionModel,
    edge: &Edge,
    profile: &SiteProfile,
    parent: &Sequence,
    settings: &BranchSettings,
    rng: &mut R,
) -> Result<Sequence, SimulationError> {
    let n = model.num_states();
    let single_component = model.num_mixtures() == 1;
    let scale = settings.partition_rate * settings.branch_scale;
    let mut cache = MatrixCache::new(model);
    let mut child = Vec::with_capacity(parent.len());

    for (i, &state) in parent.iter().enumerate() {
        if is_gap(state) {
            child.push(STATE_UNKNOWN);
            continue;
        }
        let rate = profile.rate(i);
        if rate == 0.0 {
            child.push(state);
            continue;
        }
        let component = if single_component { 0 } else { profile.component(i) };
        let class = if settings.heterotachy { profile.class(i) } else { 0 };
        let length = if settings.heterotachy {
            edge.class_length(class)
        } else {
            edge.length
        };
        let time = scale * length * rate;

        let start = state as usize * n;
        let drawn = if settings.continuous_gamma {
            let acc = cache.compute(component, time);
            sample_accumulated_max_first(rng, &acc, start, n, state as usize)
        } else {
            let acc = cache.get(component, class, rate, time);
            sample_accumulated_max_first(rng, acc, start, n, state as usize)
        };
        let next = drawn.ok_or(SimulationError::SamplingFailed("state from transition matrix"))?;
        child.push(next as State);
    }
    Ok(Sequence::from_states(child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MixtureModel, RateHeterogeneity, ReversibleModel};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::sync::Arc;

    fn uniform_profile(len: usize) -> SiteProfile {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        SiteProfile::draw(&RateHeterogeneity::Uniform, &[1.0], len, &mut rng).unwrap()
    }

    #[test]
    fn test_switching_threshold_table() {
        assert!((switching_threshold(1_000, false) - 2.226224503e-3).abs() < 1e-12);
        assert!((switching_threshold(1_000, true) - 13.3073605e-3).abs() < 1e-12);
        assert!((switching_threshold(100_000, false) - 1.4e-5).abs() < 1e-15);
        assert!((switching_threshold(500_000, true) - 7.0 / 500_000.0).abs() < 1e-15);
        assert!((switching_threshold(2_000_000, true) - 3e-6).abs() < 1e-15);
        assert!((switching_threshold(1_000_000, false) - 1e-6).abs() < 1e-15);
    }

    #[test]
    fn test_method_selection() {
        let settings = BranchSettings::default();
        let short = Edge::new(0.001);
        let long = Edge::new(0.5);
        assert_eq!(select_method(&short, 0.01, &settings, false), SimulationMethod::RateMatrix);
        assert_eq!(select_method(&long, 0.01, &settings, false), SimulationMethod::TransProbMatrix);

        let sub_level = BranchSettings {
            mixture_at_sub_level: true,
            ..settings
        };
        assert_eq!(select_method(&long, 0.01, &sub_level, true), SimulationMethod::RateMatrix);

        let hetero = BranchSettings {
            heterotachy: true,
            ..settings
        };
        assert_eq!(select_method(&short, 0.01, &hetero, false), SimulationMethod::TransProbMatrix);

        let model: Arc<dyn SubstitutionModel> = Arc::new(ReversibleModel::jc().unwrap());
        let branch_model = Edge::new(0.001).with_model(model);
        assert_eq!(
            select_method(&branch_model, 0.01, &settings, false),
            SimulationMethod::TransProbMatrix
        );
    }

    #[test]
    fn test_jc_change_fraction() {
        let model = ReversibleModel::jc().unwrap();
        let parent: Sequence = (0..10_000).map(|i| (i % 4) as State).collect();
        let profile = uniform_profile(parent.len());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let t = 0.1;
        let child = sample_from_transition_matrix(
            &model,
            &Edge::new(t),
            &profile,
            &parent,
            &BranchSettings::default(),
            &mut rng,
        )
        .unwrap();
        let changed = parent.iter().zip(child.iter()).filter(|(a, b)| a != b).count();
        let frac = changed as f64 / 10_000.0;
        let expected = 0.75 * (1.0 - (-4.0 * t / 3.0_f64).exp());
        assert!((frac - expected).abs() < 0.012, "{frac} vs {expected}");
    }

    #[test]
    fn test_gaps_and_invariant_sites_are_kept() {
        let model = ReversibleModel::jc().unwrap();
        let parent = Sequence::from_states(vec![STATE_UNKNOWN; 50]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let child = sample_from_transition_matrix(
            &model,
            &Edge::new(5.0),
            &uniform_profile(50),
            &parent,
            &BranchSettings::default(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(child, parent);

        let invariant = SiteProfile::draw(
            &RateHeterogeneity::Invariant { proportion: 0.999_999 },
            &[1.0],
            20,
            &mut rng,
        )
        .unwrap();
        let parent: Sequence = vec![2; 20].into();
        let child = sample_from_transition_matrix(
            &model,
            &Edge::new(5.0),
            &invariant,
            &parent,
            &BranchSettings::default(),
            &mut rng,
        )
        .unwrap();
        for i in 0..20 {
            if invariant.rate(i) == 0.0 {
                assert_eq!(child.get(i), Some(2));
            }
        }
    }

    #[test]
    fn test_heterotachy_uses_class_lengths() {
        let model = ReversibleModel::jc().unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let strategy = RateHeterogeneity::Heterotachy {
            weights: vec![0.5, 0.5],
        };
        let profile = SiteProfile::draw(&strategy, &[1.0], 4_000, &mut rng).unwrap();
        let parent: Sequence = vec![0; 4_000].into();
        let edge = Edge::new(1.0).with_class_lengths(vec![0.0, 10.0]);
        let settings = BranchSettings {
            heterotachy: true,
            ..Default::default()
        };
        let child =
            sample_from_transition_matrix(&model, &edge, &profile, &parent, &settings, &mut rng)
                .unwrap();
        let mut changed = [0usize; 2];
        let mut total = [0usize; 2];
        for i in 0..4_000 {
            let c = profile.class(i);
            total[c] += 1;
            if child.get(i) != Some(0) {
                changed[c] += 1;
            }
        }
        assert_eq!(changed[0], 0);
        // saturated class changes three quarters of its sites
        let frac = changed[1] as f64 / total[1] as f64;
        assert!((frac - 0.75).abs() < 0.04, "{frac}");
    }

    #[test]
    fn test_mixture_components_use_their_matrix() {
        let fast = ReversibleModel::hky(1.0, &[0.25; 4]).unwrap();
        let frozen = ReversibleModel::hky(1.0, &[0.97, 0.01, 0.01, 0.01]).unwrap();
        let mix = MixtureModel::new(vec![fast, frozen], vec![1.0, 1.0]).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let profile =
            SiteProfile::draw(&RateHeterogeneity::Uniform, &[0.5, 0.5], 2_000, &mut rng).unwrap();
        let parent: Sequence = vec![0; 2_000].into();
        let child = sample_from_transition_matrix(
            &mix,
            &Edge::new(20.0),
            &profile,
            &parent,
            &BranchSettings::default(),
            &mut rng,
        )
        .unwrap();
        let kept_in_frozen = profile
            .sites_of_component(1)
            .iter()
            .filter(|&&i| child.get(i) == Some(0))
            .count() as f64
            / profile.sites_of_component(1).len() as f64;
        // at stationarity the skewed component returns A 97% of the time
        assert!(kept_in_frozen > 0.9, "{kept_in_frozen}");
    }
}
