//! Guarded write against the votee.

use crate::model::voteable::{EntityId, EntityKind};
use crate::repo::vote_store::{StoreResult, VoteStore};
use crate::vote::transition::VoteTransition;
use log::{debug, error};

/// Issues one conditionally-guarded mutation per vote.
///
/// Performs no retry: `Ok(false)` means the guard did not hold (stale
/// caller state or a concurrent winner) or the entity is gone.
pub struct ConditionalUpdateExecutor<'s, S: VoteStore> {
    store: &'s S,
}

impl<'s, S: VoteStore> ConditionalUpdateExecutor<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Returns `true` only when exactly one entity matched and was mutated.
    pub fn apply(
        &self,
        kind: &EntityKind,
        votee_id: EntityId,
        transition: &VoteTransition,
    ) -> StoreResult<bool> {
        let outcome = self
            .store
            .conditional_update(kind, votee_id, &transition.guard, &transition.mutation)
            .map_err(|err| {
                error!(
                    "event=vote_apply module=vote status=error kind={} votee_id={} intent={} error={}",
                    kind, votee_id, transition.intent, err
                );
                err
            })?;

        let applied = outcome.matched && outcome.count == 1;
        debug!(
            "event=vote_apply module=vote status={} kind={} votee_id={} intent={} value={} matched={} count={}",
            if applied { "ok" } else { "unmatched" },
            kind,
            votee_id,
            transition.intent,
            transition.value,
            outcome.matched,
            outcome.count
        );
        Ok(applied)
    }
}
