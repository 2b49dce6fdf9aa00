//! Discrete sampling from accumulated probability tables.
//!
//! Probability rows are converted once into running sums so that each draw is
//! a search rather than a rejection loop. All searches share one rule: the
//! drawn value `r` selects the first bucket `i` with `acc[i] >= r` whose
//! predecessor is strictly below `r`, so equal boundaries are never counted
//! twice.
//!
//! [`SiteRateIndex`] covers the other hot path: picking a site in proportion
//! to a per-site weight that changes after every event.

use rand::Rng;

/// Replace every row of a `num_rows x num_cols` row-major table by its
/// running sum.
///
/// The last cell of each row ends up holding the row total.
pub fn to_accumulated(values: &mut [f64], num_rows: usize, num_cols: usize) {
    debug_assert!(values.len() >= num_rows * num_cols);
    if num_rows == 0 || num_cols == 0 {
        return;
    }
    for row in values.chunks_exact_mut(num_cols).take(num_rows) {
        for j in 1..row.len() {
            row[j] += row[j - 1];
        }
    }
}

/// Draw a bucket from the accumulated row `acc[start..start + count]`.
///
/// Returns the absolute index minus `start`, or `None` when no bucket covers
/// the draw (empty row, NaN, or underflow). Callers treat `None` as fatal.
pub fn sample_accumulated<R: Rng + ?Sized>(
    rng: &mut R,
    acc: &[f64],
    start: usize,
    count: usize,
) -> Option<usize> {
    let row = acc.get(start..start + count)?;
    let r = draw(rng, row)?;
    binary_search(row, r, 0, count)
}

/// Same distribution as [`sample_accumulated`], but the bucket `hint` is
/// tested before falling back to a binary search of the side that must
/// contain the draw.
///
/// With a strongly skewed row (the unchanged state on a short branch) the
/// first comparison usually succeeds.
pub fn sample_accumulated_max_first<R: Rng + ?Sized>(
    rng: &mut R,
    acc: &[f64],
    start: usize,
    count: usize,
    hint: usize,
) -> Option<usize> {
    let row = acc.get(start..start + count)?;
    let r = draw(rng, row)?;
    if hint >= count {
        return binary_search(row, r, 0, count);
    }

    let lower = if hint == 0 { None } else { Some(row[hint - 1]) };
    let above_lower = lower.map_or(true, |l| r > l);
    if above_lower && r <= row[hint] {
        Some(hint)
    } else if r > row[hint] {
        binary_search(row, r, hint + 1, count)
    } else {
        binary_search(row, r, 0, hint)
    }
}

/// Linear scan over an unaccumulated row. Used where a table is sampled once
/// and accumulating it would not pay off.
pub fn sample_linear<R: Rng + ?Sized>(
    rng: &mut R,
    probs: &[f64],
    start: usize,
    count: usize,
) -> Option<usize> {
    let row = probs.get(start..start + count)?;
    let total: f64 = row.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    let r = rng.random::<f64>() * total;
    let mut acc = 0.0;
    for (i, &p) in row.iter().enumerate() {
        acc += p;
        if r <= acc && p > 0.0 {
            return Some(i);
        }
    }
    // r can exceed the recomputed sum by rounding only
    row.iter().rposition(|&p| p > 0.0)
}

/// Index of the largest value; ties resolve to the first.
pub fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

#[inline]
fn draw<R: Rng + ?Sized>(rng: &mut R, row: &[f64]) -> Option<f64> {
    let total = *row.last()?;
    if !(total > 0.0) {
        return None;
    }
    Some(rng.random::<f64>() * total)
}

/// Search `row[first..end)` for the bucket containing `r`.
fn binary_search(row: &[f64], r: f64, first: usize, end: usize) -> Option<usize> {
    let (mut lo, mut hi) = (first, end);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let above_prev = mid == first || r > row[mid - 1];
        if r <= row[mid] && above_prev {
            return Some(mid);
        }
        if r > row[mid] {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    None
}

/// Fenwick tree over non-negative per-site weights with weighted sampling.
///
/// Uses 1-based indexing internally; the plain values are kept alongside so
/// that a site can be overwritten and a block spliced in.
#[derive(Debug, Clone, Default)]
pub struct SiteRateIndex {
    tree: Vec<f64>,
    values: Vec<f64>,
}

impl SiteRateIndex {
    /// Build from per-site weights in O(n).
    pub fn from_rates(values: Vec<f64>) -> Self {
        let tree = build_tree(&values);
        Self { tree, values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Weight of site `i`.
    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        self.values[i]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Overwrite the weight of site `i`, returning the previous one.
    ///
    /// # Panics
    /// Panics if `i >= len`.
    pub fn set(&mut self, i: usize, value: f64) -> f64 {
        let old = self.values[i];
        self.values[i] = value;
        let delta = value - old;
        let mut idx = i + 1;
        while idx < self.tree.len() {
            self.tree[idx] += delta;
            idx += lowbit(idx);
        }
        old
    }

    /// Insert `block` before site `position`; the index is rebuilt.
    pub fn insert_block(&mut self, position: usize, block: &[f64]) {
        self.values.splice(position..position, block.iter().copied());
        self.tree = build_tree(&self.values);
    }

    /// Sum of weights in `[0, i]`.
    pub fn prefix_sum(&self, i: usize) -> f64 {
        let mut idx = (i + 1).min(self.values.len());
        let mut sum = 0.0;
        while idx > 0 {
            sum += self.tree[idx];
            idx -= lowbit(idx);
        }
        sum
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.prefix_sum(self.values.len() - 1)
        }
    }

    /// Draw a site with probability proportional to its weight.
    ///
    /// Zero-weight sites are never returned. `None` if every weight is zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        let total = self.total();
        if !(total > 0.0) {
            return None;
        }
        let mut remaining = rng.random::<f64>() * total;
        let n = self.values.len();
        let mut pos = 0;
        let mut step = n.next_power_of_two();
        while step > 0 {
            let next = pos + step;
            if next <= n && self.tree[next] <= remaining {
                pos = next;
                remaining -= self.tree[next];
            }
            step >>= 1;
        }
        if pos < n && self.values[pos] > 0.0 {
            Some(pos)
        } else {
            // rounding pushed the draw onto an empty tail or a zero cell
            self.values[..n.min(pos + 1)]
                .iter()
                .rposition(|&v| v > 0.0)
                .or_else(|| self.values.iter().position(|&v| v > 0.0))
        }
    }
}

fn build_tree(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut tree = vec![0.0; n + 1];
    tree[1..].copy_from_slice(values);
    for i in 1..=n {
        let parent = i + lowbit(i);
        if parent <= n {
            let child = tree[i];
            tree[parent] += child;
        }
    }
    tree
}

/// Lowest set bit of `i`.
#[inline]
fn lowbit(i: usize) -> usize {
    i & i.wrapping_neg()
}
