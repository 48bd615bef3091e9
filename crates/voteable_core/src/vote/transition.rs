//! Vote transition resolution.
//!
//! # Responsibility
//! - Turn `(intent, value, voter)` into the guard that must hold on the
//!   votee's voter sets and the mutation to apply when it does.
//! - Compute weight-scaled counter deltas, shared with ancestor propagation.
//!
//! # Invariants
//! - Pure: no I/O, no inference of intent or value.
//! - Every mutation keeps the up/down voter sets disjoint when its guard held.

use crate::config::vote_config::VoteWeights;
use crate::model::voteable::{VoteIntent, VoteRecord, VoteValue, VoterId};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Precondition on the votee's voter sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteGuard {
    pub voter_id: VoterId,
    /// Side the voter must currently hold.
    pub required_side: Option<VoteValue>,
    /// Sides the voter must not currently hold.
    pub forbidden_sides: Vec<VoteValue>,
}

impl VoteGuard {
    pub fn matches(&self, record: &VoteRecord) -> bool {
        if let Some(side) = self.required_side {
            if !record.voter_ids(side).contains(&self.voter_id) {
                return false;
            }
        }
        self.forbidden_sides
            .iter()
            .all(|side| !record.voter_ids(*side).contains(&self.voter_id))
    }
}

/// A counter would leave the `i64` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOverflow {
    pub field: &'static str,
}

impl Display for CounterOverflow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} would overflow", self.field)
    }
}

impl Error for CounterOverflow {}

/// Signed counter increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub vote_count: i64,
    pub up_count: i64,
    pub down_count: i64,
    pub vote_point: i64,
}

impl CounterDelta {
    /// Deltas for one transition under `weights`.
    ///
    /// With `include_counters == false` only `vote_point` is non-zero.
    /// Point deltas saturate for weights outside the range
    /// `VoteConfigBuilder::build` accepts.
    pub fn for_transition(
        intent: VoteIntent,
        value: VoteValue,
        weights: &VoteWeights,
        include_counters: bool,
    ) -> Self {
        let (vote_count, side_step, point) = match intent {
            VoteIntent::New => (1, 1, weights.point(value)),
            VoteIntent::Revote => (
                0,
                1,
                weights
                    .point(value)
                    .saturating_sub(weights.point(value.opposite())),
            ),
            VoteIntent::Unvote => (-1, -1, weights.point(value).saturating_neg()),
        };

        let mut delta = Self {
            vote_point: point,
            ..Self::default()
        };
        if !include_counters {
            return delta;
        }

        delta.vote_count = vote_count;
        let (target, other) = match value {
            VoteValue::Up => (&mut delta.up_count, &mut delta.down_count),
            VoteValue::Down => (&mut delta.down_count, &mut delta.up_count),
        };
        *target = side_step;
        if intent == VoteIntent::Revote {
            *other = -1;
        }
        delta
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Adds the deltas to `record`, leaving it untouched on overflow.
    pub fn apply_to(&self, record: &mut VoteRecord) -> Result<(), CounterOverflow> {
        let add = |current: i64, step: i64, field: &'static str| {
            current.checked_add(step).ok_or(CounterOverflow { field })
        };
        let vote_count = add(record.vote_count, self.vote_count, "vote_count")?;
        let up_count = add(record.up_count, self.up_count, "up_count")?;
        let down_count = add(record.down_count, self.down_count, "down_count")?;
        let vote_point = add(record.vote_point, self.vote_point, "vote_point")?;

        record.vote_count = vote_count;
        record.up_count = up_count;
        record.down_count = down_count;
        record.vote_point = vote_point;
        Ok(())
    }
}

/// Voter-set change plus counter deltas applied when a guard matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMutation {
    pub voter_id: VoterId,
    pub remove_from: Option<VoteValue>,
    pub add_to: Option<VoteValue>,
    pub delta: CounterDelta,
}

impl VoteMutation {
    pub fn apply_to(&self, record: &mut VoteRecord) -> Result<(), CounterOverflow> {
        self.delta.apply_to(record)?;
        if let Some(side) = self.remove_from {
            record.voter_ids_mut(side).remove(&self.voter_id);
        }
        if let Some(side) = self.add_to {
            record.voter_ids_mut(side).insert(self.voter_id);
        }
        Ok(())
    }
}

/// Fully resolved transition for one vote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTransition {
    pub intent: VoteIntent,
    pub value: VoteValue,
    pub guard: VoteGuard,
    pub mutation: VoteMutation,
}

/// Resolves the guard and mutation for a vote on a votee with `weights`.
///
/// For `Revote`, `value` is the new target side. For `Unvote`, `value` is the
/// side being withdrawn.
pub fn resolve_transition(
    intent: VoteIntent,
    value: VoteValue,
    voter_id: VoterId,
    weights: &VoteWeights,
) -> VoteTransition {
    let (required_side, forbidden_sides, remove_from, add_to) = match intent {
        VoteIntent::New => (
            None,
            vec![VoteValue::Up, VoteValue::Down],
            None,
            Some(value),
        ),
        VoteIntent::Revote => (
            Some(value.opposite()),
            vec![value],
            Some(value.opposite()),
            Some(value),
        ),
        VoteIntent::Unvote => (Some(value), vec![value.opposite()], Some(value), None),
    };

    VoteTransition {
        intent,
        value,
        guard: VoteGuard {
            voter_id,
            required_side,
            forbidden_sides,
        },
        mutation: VoteMutation {
            voter_id,
            remove_from,
            add_to,
            delta: CounterDelta::for_transition(intent, value, weights, true),
        },
    }
}
