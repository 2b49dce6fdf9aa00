//! Gillespie simulation of the events on one branch.
//!
//! Insertions, deletions and (under the rate-matrix method) substitutions are
//! competing exponential clocks. The waiting time to the next event is drawn
//! from the summed rate; if it overruns the remaining branch length the
//! branch is done, otherwise one event is picked in proportion to its share
//! of the total and applied to the child sequence.
//!
//! Rates:
//! - insertions: `ins_rate × (L + 1 − gaps)`, one slot per real site plus
//!   the end;
//! - deletions: `del_rate × (L − 1 − gaps + mean_deletion_size)`;
//! - substitutions: the sum of per-site exit rates, kept in a
//!   [`SiteRateIndex`] so that picking a site and updating its rate are both
//!   logarithmic.

use super::indel::{select_valid_position, IndelModel};
use super::root::StateFrequencies;
use crate::base::{is_gap, Sequence, State};
use crate::errors::SimulationError;
use crate::genome::{Insertion, InsertionChain};
use crate::model::{JumpTables, SiteProfile};
use crate::sampling::SiteRateIndex;
use rand::Rng;
use rand_distr::{Distribution, Exp1};
use std::ops::AddAssign;
use tracing::{trace, warn};

/// How a branch is simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMethod {
    /// Sample the child from `P(t)` in one step; only indels are events.
    TransProbMatrix,
    /// Start from a copy of the parent; substitutions are events too.
    RateMatrix,
}

/// Tables the event loop reads from.
#[derive(Debug, Clone, Copy)]
pub struct EventTables<'a> {
    pub jump: &'a JumpTables,
    /// Frequencies of inserted states, one row per mixture component.
    pub insertion_frequencies: &'a StateFrequencies,
    /// Draw a fresh component for every substitution instead of using the
    /// site's own.
    pub mixture_at_sub_level: bool,
    /// Multiplier applied to every substitution rate (partition rate).
    pub rate_scale: f64,
}

/// Run-wide state mutated by events.
#[derive(Debug, Clone)]
pub struct EventState {
    pub indels: IndelModel,
    pub chain: InsertionChain,
    pub profile: SiteProfile,
}

/// What happened on a branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub insertions: usize,
    pub deletions: usize,
    pub substitutions: usize,
    pub inserted_sites: usize,
    pub deleted_sites: usize,
}

impl AddAssign for EventCounts {
    fn add_assign(&mut self, other: Self) {
        self.insertions += other.insertions;
        self.deletions += other.deletions;
        self.substitutions += other.substitutions;
        self.inserted_sites += other.inserted_sites;
        self.deleted_sites += other.deleted_sites;
    }
}

/// Per-branch event totals.
struct BranchEvents<'s> {
    sequence: &'s mut Sequence,
    num_gaps: &'s mut usize,
    method: SimulationMethod,
    rates: SiteRateIndex,
    substitutions_enabled: bool,
    insertion_total: f64,
    deletion_total: f64,
}

impl BranchEvents<'_> {
    fn substitution_total(&self) -> f64 {
        if self.substitutions_enabled {
            self.rates.total().max(0.0)
        } else {
            0.0
        }
    }

    fn total(&self) -> f64 {
        self.substitution_total() + self.insertion_total.max(0.0) + self.deletion_total.max(0.0)
    }

    fn apply_length_change(&mut self, state: &EventState, change: isize) {
        self.insertion_total += state.indels.insertion_rate() * change as f64;
        self.deletion_total += state.indels.deletion_rate() * change as f64;
    }
}

/// Exit rate of one site: zero for gaps and invariant sites.
#[inline]
fn site_exit_rate(
    tables: &EventTables<'_>,
    profile: &SiteProfile,
    site: usize,
    state: State,
) -> f64 {
    if is_gap(state) {
        return 0.0;
    }
    let rate = profile.rate(site);
    if rate == 0.0 {
        return 0.0;
    }
    tables.rate_scale * rate * tables.jump.exit_rate(profile.component(site), state)
}

/// Simulate the events along a branch of (already scaled) length `length`.
///
/// `sequence` starts as the child produced by the branch method and is
/// edited in place; `num_gaps` tracks its deleted sites. New insertions are
/// appended to `state.chain` and spliced into `state.profile`.
///
/// # Errors
/// Fails when an indel size or position cannot be drawn, or a sampling
/// table does not cover its draw.
pub fn simulate_branch_events<R: Rng + ?Sized>(
    tables: &EventTables<'_>,
    state: &mut EventState,
    rng: &mut R,
    sequence: &mut Sequence,
    num_gaps: &mut usize,
    method: SimulationMethod,
    length: f64,
) -> Result<EventCounts, SimulationError> {
    let len = sequence.len();
    let (rates, substitutions_enabled) = match method {
        SimulationMethod::RateMatrix => {
            let values: Vec<f64> = sequence
                .iter()
                .enumerate()
                .map(|(i, &s)| site_exit_rate(tables, &state.profile, i, s))
                .collect();
            *num_gaps = sequence.count_gaps();
            let index = SiteRateIndex::from_rates(values);
            let total = index.total();
            if total.is_nan() {
                warn!("Total substitution rate is NaN; substitutions disabled on this branch");
            }
            (index, !total.is_nan())
        }
        SimulationMethod::TransProbMatrix => (SiteRateIndex::from_rates(Vec::new()), false),
    };

    let mut branch = BranchEvents {
        sequence,
        num_gaps,
        method,
        rates,
        substitutions_enabled,
        insertion_total: 0.0,
        deletion_total: 0.0,
    };

    if state.indels.is_enabled() {
        let real = len as f64 - *branch.num_gaps as f64;
        let mean_deletion = state.indels.mean_deletion_size(len, rng)?;
        branch.insertion_total = state.indels.insertion_rate() * (real + 1.0);
        branch.deletion_total = state.indels.deletion_rate() * (real - 1.0 + mean_deletion);
    }

    let mut counts = EventCounts::default();
    let mut remaining = length;
    while remaining > 0.0 {
        let total = branch.total();
        if !(total > 0.0) || !total.is_finite() {
            break;
        }
        let unit: f64 = Exp1.sample(rng);
        let waiting = unit / total;
        if waiting > remaining {
            break;
        }
        remaining -= waiting;

        let ins = branch.insertion_total.max(0.0);
        let del = branch.deletion_total.max(0.0);
        let mut event = Event::Substitution;
        if ins > 0.0 || del > 0.0 {
            let r = rng.random::<f64>() * total;
            if r < ins {
                event = Event::Insertion;
            } else if r < ins + del {
                event = Event::Deletion;
            }
        }

        match event {
            Event::Insertion => {
                let size = insert(tables, state, rng, &mut branch)?;
                branch.apply_length_change(state, size as isize);
                counts.insertions += 1;
                counts.inserted_sites += size;
            }
            Event::Deletion => {
                let deleted = delete(state, rng, &mut branch)?;
                *branch.num_gaps += deleted;
                branch.apply_length_change(state, -(deleted as isize));
                counts.deletions += 1;
                counts.deleted_sites += deleted;
            }
            Event::Substitution => {
                if branch.method == SimulationMethod::RateMatrix && branch.substitutions_enabled {
                    substitute(tables, state, rng, &mut branch)?;
                    counts.substitutions += 1;
                }
            }
        }
    }
    Ok(counts)
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Insertion,
    Deletion,
    Substitution,
}

fn insert<R: Rng + ?Sized>(
    tables: &EventTables<'_>,
    state: &mut EventState,
    rng: &mut R,
    branch: &mut BranchEvents<'_>,
) -> Result<usize, SimulationError> {
    let len = branch.sequence.len();
    let position = select_valid_position(rng, len + 1, branch.sequence.as_slice())?;
    let size = state.indels.draw_insertion_size(rng)?;

    state.profile.insert_sites(position, size, rng);
    let block = (position..position + size)
        .map(|i| tables.insertion_frequencies.draw(rng, state.profile.component(i)))
        .collect::<Result<Vec<State>, _>>()?;
    branch.sequence.insert_block(position, &block);

    if branch.method == SimulationMethod::RateMatrix {
        let block_rates: Vec<f64> = block
            .iter()
            .enumerate()
            .map(|(k, &s)| site_exit_rate(tables, &state.profile, position + k, s))
            .collect();
        branch.rates.insert_block(position, &block_rates);
    }

    state
        .chain
        .push(Insertion::new(position, size, position == len));
    trace!(position, size, "insertion");
    Ok(size)
}

/// Returns the number of real sites removed.
fn delete<R: Rng + ?Sized>(
    state: &mut EventState,
    rng: &mut R,
    branch: &mut BranchEvents<'_>,
) -> Result<usize, SimulationError> {
    let len = branch.sequence.len();
    let size = state.indels.draw_deletion_size(rng)?;
    let start = if len > size {
        select_valid_position(rng, len - size, branch.sequence.as_slice())?
    } else {
        0
    };

    let mut deleted = 0;
    let mut i = start;
    while deleted < size && i < len {
        if branch.sequence.mark_deleted(i) {
            deleted += 1;
            if branch.method == SimulationMethod::RateMatrix {
                branch.rates.set(i, 0.0);
            }
        }
        i += 1;
    }
    trace!(start, size, deleted, "deletion");
    Ok(deleted)
}

fn substitute<R: Rng + ?Sized>(
    tables: &EventTables<'_>,
    state: &mut EventState,
    rng: &mut R,
    branch: &mut BranchEvents<'_>,
) -> Result<(), SimulationError> {
    let site = branch
        .rates
        .sample(rng)
        .ok_or(SimulationError::SamplingFailed("substitution site"))?;
    let profile = &state.profile;
    let component = if !profile.has_components() {
        0
    } else if tables.mixture_at_sub_level {
        profile.draw_component(rng)
    } else {
        profile.component(site)
    };

    let old = branch.sequence.as_slice()[site];
    let new = tables
        .jump
        .sample_jump(rng, component, old)
        .ok_or(SimulationError::SamplingFailed("substitution target state"))?;
    branch.sequence.as_mut_slice()[site] = new;

    let site_rate = tables.rate_scale * profile.rate(site);
    let delta =
        site_rate * (tables.jump.exit_rate(component, new) - tables.jump.exit_rate(component, old));
    let current = branch.rates.get(site);
    branch.rates.set(site, (current + delta).max(0.0));
    Ok(())
}
