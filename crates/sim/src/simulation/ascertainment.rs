//! Constant-site removal for ascertainment-biased output.
//!
//! The alignment is oversampled, then only columns where at least two tips
//! carry different real states are kept. Gaps neither make a column variant
//! nor keep it constant.

use crate::base::{is_gap, Sequence, State};
use crate::errors::SimulationError;

/// Summary of one alignment column seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    /// Only gaps.
    Unseen,
    /// One real state.
    Constant(State),
    Variant,
}

/// Indices of the variant columns among the first `len` sites of
/// `sequences`.
pub fn variant_columns<'a, I>(sequences: I, len: usize) -> Vec<usize>
where
    I: IntoIterator<Item = &'a Sequence>,
{
    let mut mask = vec![Column::Unseen; len];
    for sequence in sequences {
        for (column, &state) in mask.iter_mut().zip(sequence.iter()) {
            if is_gap(state) {
                continue;
            }
            *column = match *column {
                Column::Unseen => Column::Constant(state),
                Column::Constant(seen) if seen != state => Column::Variant,
                other => other,
            };
        }
    }
    mask.iter()
        .enumerate()
        .filter(|(_, c)| **c == Column::Variant)
        .map(|(i, _)| i)
        .collect()
}

/// The variant columns of `sequences`: the first `expected` of them, or all
/// of them when `keep_all` is set.
///
/// # Errors
/// `TooFewVariantSites` if fewer than `expected` columns vary.
pub fn select_variant_columns<'a, I>(
    sequences: I,
    len: usize,
    expected: usize,
    keep_all: bool,
) -> Result<Vec<usize>, SimulationError>
where
    I: IntoIterator<Item = &'a Sequence>,
{
    let mut columns = variant_columns(sequences, len);
    if columns.len() < expected {
        return Err(SimulationError::TooFewVariantSites {
            found: columns.len(),
            expected,
        });
    }
    if !keep_all {
        columns.truncate(expected);
    }
    Ok(columns)
}

/// Keep only `columns` (ascending) of `sequence`.
pub fn retain_columns(sequence: &mut Sequence, columns: &[usize]) {
    let states = sequence.as_slice();
    let kept: Vec<State> = columns
        .iter()
        .filter_map(|&c| states.get(c).copied())
        .collect();
    *sequence = Sequence::from_states(kept);
}
