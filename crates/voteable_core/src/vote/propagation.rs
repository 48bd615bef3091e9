//! Cascading vote deltas to ancestor entities.
//!
//! # Responsibility
//! - After a successful guarded votee write, apply weight-scaled deltas to
//!   every configured ancestor reachable from the votee.
//!
//! # Invariants
//! - Ancestor deltas use the ancestor entry's weights, never the votee's.
//! - Counter deltas are skipped when the entry disables counter propagation.
//! - Ancestor writes are unconditional; a failed write never unwinds the
//!   votee mutation.

use crate::config::vote_config::VoteConfig;
use crate::model::voteable::{EntityId, EntityKind, VoteIntent, VoteValue, Voteable};
use crate::repo::vote_store::{StoreError, VoteStore};
use crate::vote::transition::CounterDelta;
use log::{debug, warn};

/// Ancestor write that failed after the primary vote committed.
#[derive(Debug)]
pub struct PropagationFailure {
    pub kind: EntityKind,
    pub id: EntityId,
    pub error: StoreError,
}

/// Summary of one propagation fan-out.
#[derive(Debug, Default)]
pub struct PropagationReport {
    /// Ancestors whose counters were incremented.
    pub applied: Vec<(EntityKind, EntityId)>,
    /// Entries skipped for lack of relation metadata or foreign-key value.
    pub skipped: Vec<EntityKind>,
    pub failures: Vec<PropagationFailure>,
}

impl PropagationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies cascaded vote deltas to ancestors.
pub struct PropagationEngine<'a, S: VoteStore> {
    config: &'a VoteConfig,
    store: &'a S,
}

impl<'a, S: VoteStore> PropagationEngine<'a, S> {
    pub fn new(config: &'a VoteConfig, store: &'a S) -> Self {
        Self { config, store }
    }

    /// Propagates one applied transition on `votee` to its ancestors.
    ///
    /// Ancestor writes are issued in registration-table order; callers must
    /// not rely on any order.
    pub fn propagate(
        &self,
        votee: &Voteable,
        intent: VoteIntent,
        value: VoteValue,
    ) -> PropagationReport {
        let mut report = PropagationReport::default();

        for rule in self.config.ancestors(&votee.kind) {
            let Some(ancestor_id) = rule.link.as_ref().and_then(|link| link.resolve(votee)) else {
                debug!(
                    "event=vote_propagate module=vote status=skipped kind={} votee_id={} ancestor_kind={}",
                    votee.kind, votee.id, rule.kind
                );
                report.skipped.push(rule.kind.clone());
                continue;
            };

            let delta = CounterDelta::for_transition(
                intent,
                value,
                &rule.weights,
                rule.weights.propagate_counters,
            );
            if delta.is_zero() {
                report.applied.push((rule.kind.clone(), ancestor_id));
                continue;
            }

            match self.store.increment_counters(&rule.kind, ancestor_id, &delta) {
                Ok(()) => report.applied.push((rule.kind.clone(), ancestor_id)),
                Err(error) => {
                    warn!(
                        "event=vote_propagate module=vote status=error kind={} votee_id={} ancestor_kind={} ancestor_id={} error={}",
                        votee.kind, votee.id, rule.kind, ancestor_id, error
                    );
                    report.failures.push(PropagationFailure {
                        kind: rule.kind.clone(),
                        id: ancestor_id,
                        error,
                    });
                }
            }
        }

        report
    }
}
