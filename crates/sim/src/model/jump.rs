use super::SubstitutionModel;
use crate::base::State;
use crate::sampling::{sample_accumulated_max_first, to_accumulated};
use rand::Rng;

/// Exit rates and accumulated jump probabilities of a model, one block per
/// mixture component.
///
/// For component `m` and state `i`, `exit_rate(m, i) = -Q[i][i]` and row
/// `i` of the jump matrix holds `Q[i][j] / -Q[i][i]` for `j != i` (zero on
/// the diagonal) as a running sum. A state with no exits keeps an all-zero
/// row and can never be drawn from.
#[derive(Debug, Clone)]
pub struct JumpTables {
    num_states: usize,
    num_mixtures: usize,
    exit_rates: Vec<f64>,
    jump: Vec<f64>,
}

impl JumpTables {
    pub fn from_model(model: &dyn SubstitutionModel) -> Self {
        let n = model.num_states();
        let m = model.num_mixtures();
        let mut exit_rates = vec![0.0; m * n];
        let mut jump = vec![0.0; m * n * n];

        for component in 0..m {
            let q = model.rate_matrix(component);
            for i in 0..n {
                let rate = -q[i * n + i];
                exit_rates[component * n + i] = rate;
                let row = &mut jump[(component * n + i) * n..(component * n + i + 1) * n];
                if rate > 0.0 {
                    for (j, cell) in row.iter_mut().enumerate() {
                        if j != i {
                            *cell = q[i * n + j] / rate;
                        }
                    }
                }
            }
        }
        to_accumulated(&mut jump, m * n, n);

        Self {
            num_states: n,
            num_mixtures: m,
            exit_rates,
            jump,
        }
    }

    #[inline]
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    #[inline]
    pub fn num_mixtures(&self) -> usize {
        self.num_mixtures
    }

    /// `-Q[state][state]` of `component`.
    #[inline]
    pub fn exit_rate(&self, component: usize, state: State) -> f64 {
        self.exit_rates[component * self.num_states + state as usize]
    }

    /// Accumulated jump row of `state` under `component`.
    pub fn jump_row(&self, component: usize, state: State) -> &[f64] {
        let n = self.num_states;
        let start = (component * n + state as usize) * n;
        &self.jump[start..start + n]
    }

    /// Draw the state a substitution at `state` leads to.
    ///
    /// The search starts at the middle of the row, since jump rows have no
    /// single dominant entry.
    pub fn sample_jump<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        component: usize,
        state: State,
    ) -> Option<State> {
        let n = self.num_states;
        let start = (component * n + state as usize) * n;
        sample_accumulated_max_first(rng, &self.jump, start, n, n / 2).map(|s| s as State)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MixtureModel, ReversibleModel};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_jc_tables() {
        let model = ReversibleModel::jc().unwrap();
        let tables = JumpTables::from_model(&model);
        for s in 0..4 {
            assert!((tables.exit_rate(0, s) - 1.0).abs() < 1e-12);
            let row = tables.jump_row(0, s);
            assert!((row[3] - 1.0).abs() < 1e-12);
            assert!(row.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_jump_never_stays() {
        let model = ReversibleModel::hky(3.0, &[0.1, 0.2, 0.3, 0.4]).unwrap();
        let tables = JumpTables::from_model(&model);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        for _ in 0..2000 {
            for s in 0..4u16 {
                let to = tables.sample_jump(&mut rng, 0, s).unwrap();
                assert_ne!(to, s);
                assert!(to < 4);
            }
        }
    }

    #[test]
    fn test_transition_bias_visible() {
        // with kappa = 10 most jumps from A go to G
        let model = ReversibleModel::hky(10.0, &[0.25; 4]).unwrap();
        let tables = JumpTables::from_model(&model);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let to_g = (0..10_000)
            .filter(|_| tables.sample_jump(&mut rng, 0, 0) == Some(2))
            .count();
        let frac = to_g as f64 / 10_000.0;
        assert!((frac - 10.0 / 12.0).abs() < 0.02, "{frac}");
    }

    #[test]
    fn test_mixture_blocks() {
        let a = ReversibleModel::hky(2.0, &[0.4, 0.1, 0.1, 0.4]).unwrap();
        let b = ReversibleModel::jc().unwrap();
        let m = MixtureModel::new(vec![a, b], vec![1.0, 1.0]).unwrap();
        let tables = JumpTables::from_model(&m);
        assert_eq!(tables.num_mixtures(), 2);
        assert!((tables.exit_rate(1, 0) - 1.0).abs() < 1e-12);
        assert!((tables.exit_rate(0, 0) - 1.0).abs() > 1e-3);
    }
}
