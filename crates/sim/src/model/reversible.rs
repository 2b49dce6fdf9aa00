use super::SubstitutionModel;
use crate::errors::ModelError;
use nalgebra as na;

/// Time-reversible model defined by exchangeabilities and frequencies.
///
/// `Q[i][j] = s_ij * pi_j` off the diagonal, rows sum to zero, and the matrix
/// is scaled so that one unit of time is one expected substitution per site.
/// Transition matrices come from the eigendecomposition of the symmetrised
/// matrix `diag(sqrt(pi)) Q diag(1/sqrt(pi))`.
#[derive(Debug, Clone)]
pub struct ReversibleModel {
    name: String,
    num_states: usize,
    freqs: Vec<f64>,
    rate_matrix: Vec<f64>,
    eigenvalues: Vec<f64>,
    /// `U[i][k] / sqrt(pi_i)`
    left: Vec<f64>,
    /// `U[j][k] * sqrt(pi_j)`, stored as `[k][j]`
    right: Vec<f64>,
    dna_error: Option<f64>,
}

impl ReversibleModel {
    /// Build a model from the upper triangle of the exchangeability matrix
    /// (`s_01, s_02, .., s_0n, s_12, ..`) and the state frequencies.
    ///
    /// Frequencies are renormalised to sum to one.
    ///
    /// # Errors
    /// Returns `ModelError` if dimensions disagree, any value is negative or
    /// non-finite, a frequency is zero, or no state can ever change.
    pub fn new(
        name: impl Into<String>,
        exchangeabilities: &[f64],
        freqs: &[f64],
    ) -> Result<Self, ModelError> {
        let n = freqs.len();
        if n < 2 {
            return Err(ModelError::DimensionMismatch {
                what: "state frequencies",
                expected: 2,
                actual: n,
            });
        }
        let expected = n * (n - 1) / 2;
        if exchangeabilities.len() != expected {
            return Err(ModelError::DimensionMismatch {
                what: "exchangeabilities",
                expected,
                actual: exchangeabilities.len(),
            });
        }
        if let Some((index, &value)) = exchangeabilities
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(ModelError::InvalidRate { index, value });
        }
        let freqs = normalize_frequencies(freqs)?;
        if freqs.iter().any(|&f| f <= 0.0) {
            return Err(ModelError::InvalidFrequencies(
                "every state frequency must be positive".into(),
            ));
        }

        let mut exch = vec![0.0; n * n];
        let mut k = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                exch[i * n + j] = exchangeabilities[k];
                exch[j * n + i] = exchangeabilities[k];
                k += 1;
            }
        }

        let mut q = vec![0.0; n * n];
        for i in 0..n {
            let mut row_sum = 0.0;
            for j in 0..n {
                if i != j {
                    q[i * n + j] = exch[i * n + j] * freqs[j];
                    row_sum += q[i * n + j];
                }
            }
            q[i * n + i] = -row_sum;
        }
        let mu: f64 = (0..n).map(|i| -freqs[i] * q[i * n + i]).sum();
        if !(mu > 0.0) {
            return Err(ModelError::DegenerateRateMatrix);
        }
        q.iter_mut().for_each(|v| *v /= mu);

        let sqrt_pi: Vec<f64> = freqs.iter().map(|f| f.sqrt()).collect();
        let sym = na::DMatrix::from_fn(n, n, |i, j| sqrt_pi[i] * q[i * n + j] / sqrt_pi[j]);
        // enforce exact symmetry before decomposing
        let sym = (&sym + sym.transpose()) * 0.5;
        let eigen = na::SymmetricEigen::new(sym);

        let mut left = vec![0.0; n * n];
        let mut right = vec![0.0; n * n];
        for i in 0..n {
            for kk in 0..n {
                let u = eigen.eigenvectors[(i, kk)];
                left[i * n + kk] = u / sqrt_pi[i];
                right[kk * n + i] = u * sqrt_pi[i];
            }
        }

        Ok(Self {
            name: name.into(),
            num_states: n,
            freqs,
            rate_matrix: q,
            eigenvalues: eigen.eigenvalues.iter().copied().collect(),
            left,
            right,
            dna_error: None,
        })
    }

    /// Jukes-Cantor style model: equal rates and equal frequencies over
    /// `num_states` states (JC69 for DNA, Poisson for proteins).
    pub fn equal_rates(num_states: usize) -> Result<Self, ModelError> {
        let exch = vec![1.0; num_states * num_states.saturating_sub(1) / 2];
        let freqs = vec![1.0 / num_states as f64; num_states];
        let name = match num_states {
            4 => "JC".to_string(),
            20 => "Poisson".to_string(),
            2 => "JC2".to_string(),
            n => format!("EqualRates{n}"),
        };
        Self::new(name, &exch, &freqs)
    }

    /// JC69 for nucleotides.
    pub fn jc() -> Result<Self, ModelError> {
        Self::equal_rates(4)
    }

    /// HKY85 with transition/transversion ratio `kappa`, states `ACGT`.
    pub fn hky(kappa: f64, freqs: &[f64]) -> Result<Self, ModelError> {
        // pairs in upper-triangle order: AC AG AT CG CT GT
        let exch = [1.0, kappa, 1.0, 1.0, kappa, 1.0];
        Self::new("HKY", &exch, freqs)
    }

    /// General time-reversible nucleotide model; `rates` are
    /// `AC AG AT CG CT GT`.
    pub fn gtr(rates: &[f64; 6], freqs: &[f64]) -> Result<Self, ModelError> {
        Self::new("GTR", rates, freqs)
    }

    /// Attach a sequencing error probability (applied to simulated tips).
    pub fn with_dna_error(mut self, probability: f64) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ModelError::InvalidProbability("sequencing error", probability));
        }
        self.dna_error = Some(probability);
        Ok(self)
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.freqs
    }
}

impl SubstitutionModel for ReversibleModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_states(&self) -> usize {
        self.num_states
    }

    fn state_frequencies(&self) -> Vec<f64> {
        self.freqs.clone()
    }

    fn rate_matrix(&self, _component: usize) -> Vec<f64> {
        self.rate_matrix.clone()
    }

    fn transition_matrix(&self, _component: usize, time: f64) -> Vec<f64> {
        let n = self.num_states;
        let mut p = vec![0.0; n * n];
        if !(time > 0.0) {
            for i in 0..n {
                p[i * n + i] = 1.0;
            }
            return p;
        }

        let decay: Vec<f64> = self.eigenvalues.iter().map(|&l| (l * time).exp()).collect();
        for i in 0..n {
            let row = &mut p[i * n..(i + 1) * n];
            for (j, cell) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += self.left[i * n + k] * decay[k] * self.right[k * n + j];
                }
                *cell = sum.max(0.0);
            }
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                row.iter_mut().for_each(|v| *v /= total);
            }
        }
        p
    }

    fn dna_error_probability(&self, _component: usize) -> Option<f64> {
        self.dna_error
    }
}

/// Validate and renormalise a frequency vector.
pub(crate) fn normalize_frequencies(freqs: &[f64]) -> Result<Vec<f64>, ModelError> {
    if freqs.iter().any(|f| !f.is_finite() || *f < 0.0) {
        return Err(ModelError::InvalidFrequencies(
            "frequencies must be finite and non-negative".into(),
        ));
    }
    let total: f64 = freqs.iter().sum();
    if !(total > 0.0) {
        return Err(ModelError::InvalidFrequencies("frequencies sum to zero".into()));
    }
    Ok(freqs.iter().map(|f| f / total).collect())
}
