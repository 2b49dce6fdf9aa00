//! Gamma-function helpers for discrete rate categories.

use std::f64::consts::PI;

const MAX_ITER: usize = 300;
const EPS: f64 = 1e-13;

/// Natural log of the gamma function (Lanczos approximation, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// Regularized lower incomplete gamma `P(a, x)`; `a > 0`, `x >= 0`.
pub fn gammainc(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let ln_prefix = a * x.ln() - x - ln_gamma(a);
    if x < a + 1.0 {
        let mut sum = 1.0 / a;
        let mut term = sum;
        for n in 1..=MAX_ITER {
            term *= x / (a + n as f64);
            sum += term;
            if term.abs() < sum.abs() * EPS {
                break;
            }
        }
        (sum * ln_prefix.exp()).min(1.0)
    } else {
        // continued fraction for Q = 1 - P, modified Lentz
        let tiny = 1e-300_f64;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        (1.0 - h * ln_prefix.exp()).max(0.0)
    }
}

/// Quantile of a mean-one gamma distribution with the given `shape`.
fn mean_one_quantile(shape: f64, p: f64) -> f64 {
    let cdf = |x: f64| gammainc(shape, shape * x);
    let mut hi = 1.0;
    while cdf(hi) < p && hi < 1e12 {
        hi *= 2.0;
    }
    let mut lo = 0.0;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if cdf(mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-14 * hi.max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Mean rate of each of `categories` equiprobable slices of a mean-one gamma
/// distribution. The result averages to one.
pub fn discrete_gamma_rates(shape: f64, categories: usize) -> Vec<f64> {
    if categories <= 1 {
        return vec![1.0];
    }
    let k = categories as f64;
    let mut cumulative = Vec::with_capacity(categories + 1);
    cumulative.push(0.0);
    for i in 1..categories {
        let cut = mean_one_quantile(shape, i as f64 / k);
        cumulative.push(gammainc(shape + 1.0, shape * cut));
    }
    cumulative.push(1.0);

    let mut rates: Vec<f64> = cumulative.windows(2).map(|w| (w[1] - w[0]) * k).collect();
    let mean = rates.iter().sum::<f64>() / k;
    if mean > 0.0 {
        rates.iter_mut().for_each(|r| *r /= mean);
    }
    rates
}
