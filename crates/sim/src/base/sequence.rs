use super::state::{is_gap, State, STATE_UNKNOWN};
use crate::errors::OutOfBounds;

/// Integer-coded sequence of one lineage.
///
/// Deleted or never-inserted sites hold [`STATE_UNKNOWN`]; sequences grow by
/// insertion but never shrink, so every lineage can be mapped onto one
/// common coordinate system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Sequence(Vec<State>);

impl Sequence {
    /// Create a new, empty `Sequence`.
    ///
    /// ```rust
    /// # use treevo_sim::base::Sequence;
    /// let seq = Sequence::new();
    /// assert_eq!(seq.len(), 0);
    /// ```
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Create a `Sequence` with reserved capacity for `capacity` sites.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Create a `Sequence` from raw states.
    pub fn from_states(states: Vec<State>) -> Self {
        Self(states)
    }

    /// A sequence of `len` copies of `state`.
    pub fn filled(len: usize, state: State) -> Self {
        Self(vec![state; len])
    }

    /// Return the length of the sequence in sites, gaps included.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the state at `index`, or `None` if out of range.
    #[inline]
    pub fn get(&self, index: usize) -> Option<State> {
        self.0.get(index).copied()
    }

    /// Set the state at `index`.
    ///
    /// Returns `OutOfBounds` if `index` is greater than or equal to the
    /// sequence length.
    #[inline]
    pub fn set(&mut self, index: usize, state: State) -> Result<(), OutOfBounds> {
        let len = self.len();
        self.0
            .get_mut(index)
            .map(|slot| *slot = state)
            .ok_or(OutOfBounds { index, len })
    }

    /// `true` if the site at `index` is the gap sentinel. Out-of-range
    /// indices are not gaps.
    #[inline]
    pub fn is_gap_at(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(|&s| is_gap(s))
    }

    /// Number of sentinel sites.
    pub fn count_gaps(&self) -> usize {
        self.0.iter().filter(|&&s| is_gap(s)).count()
    }

    /// Insert `block` so that its first state lands at `position`.
    ///
    /// # Panics
    /// Panics if `position > len`, like `Vec::splice`.
    pub fn insert_block(&mut self, position: usize, block: &[State]) {
        self.0.splice(position..position, block.iter().copied());
    }

    /// Overwrite the site at `index` with the sentinel, returning whether a
    /// real state was removed.
    #[inline]
    pub fn mark_deleted(&mut self, index: usize) -> bool {
        match self.0.get_mut(index) {
            Some(slot) if !is_gap(*slot) => {
                *slot = STATE_UNKNOWN;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[State] {
        &self.0
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [State] {
        &mut self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, State> {
        self.0.iter()
    }

    /// Consume the sequence, returning the underlying states.
    pub fn into_states(self) -> Vec<State> {
        self.0
    }
}

impl From<Vec<State>> for Sequence {
    fn from(states: Vec<State>) -> Self {
        Self(states)
    }
}

impl FromIterator<State> for Sequence {
    fn from_iter<I: IntoIterator<Item = State>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl AsRef<[State]> for Sequence {
    fn as_ref(&self) -> &[State] {
        &self.0
    }
}
