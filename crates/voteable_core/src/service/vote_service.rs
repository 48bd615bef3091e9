//! Vote use-case service.
//!
//! # Responsibility
//! - Provide the public `vote` entry point and voter-side lookups.
//! - Derive the transition intent from the voter's recorded side, then run
//!   resolver -> guarded write -> propagation.
//!
//! # Invariants
//! - A vote reports success only when the guarded votee write succeeded.
//! - Propagation outcomes never change the caller-visible result.
//! - No automatic retry after a guard mismatch.

use crate::config::vote_config::VoteConfig;
use crate::model::voteable::{
    EntityId, EntityKind, VoteIntent, VoteRecord, VoteValue, Voteable, VoterId,
};
use crate::repo::vote_store::{StoreError, VoteStore};
use crate::vote::executor::ConditionalUpdateExecutor;
use crate::vote::propagation::PropagationEngine;
use crate::vote::transition::resolve_transition;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Why a vote was rejected before any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// Voter already holds the requested side.
    AlreadyVoted(VoteValue),
    /// Unvote requested but the voter has no vote.
    NotVoted,
}

/// Service error for vote use-cases.
#[derive(Debug)]
pub enum VoteError {
    /// No self weights are configured for the entity kind.
    NotVoteable(EntityKind),
    /// A new vote or revote was requested without a value.
    MissingValue,
    NoOpVote(NoOpReason),
    /// The guarded update's precondition did not hold.
    GuardMismatch {
        kind: EntityKind,
        id: EntityId,
        voter_id: VoterId,
    },
    NotFound {
        kind: EntityKind,
        id: EntityId,
    },
    Store(StoreError),
}

impl Display for VoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotVoteable(kind) => write!(f, "entity kind `{kind}` is not voteable"),
            Self::MissingValue => write!(f, "vote value is required"),
            Self::NoOpVote(NoOpReason::AlreadyVoted(value)) => {
                write!(f, "voter already voted {value}")
            }
            Self::NoOpVote(NoOpReason::NotVoted) => write!(f, "voter has no vote to withdraw"),
            Self::GuardMismatch { kind, id, voter_id } => write!(
                f,
                "vote precondition failed for voter {voter_id} on {kind} {id}"
            ),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for VoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for VoteError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

/// Caller-facing vote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub voter_id: VoterId,
    /// Target side; for unvote, the side to withdraw (looked up when `None`).
    pub value: Option<VoteValue>,
    pub unvote: bool,
    /// Forces revote intent; the guard still validates it.
    pub revote: bool,
}

impl VoteRequest {
    pub fn new(voter_id: VoterId, value: VoteValue) -> Self {
        Self {
            voter_id,
            value: Some(value),
            unvote: false,
            revote: false,
        }
    }

    pub fn up(voter_id: VoterId) -> Self {
        Self::new(voter_id, VoteValue::Up)
    }

    pub fn down(voter_id: VoterId) -> Self {
        Self::new(voter_id, VoteValue::Down)
    }

    /// Withdraws whatever side the voter currently holds.
    pub fn unvote(voter_id: VoterId) -> Self {
        Self {
            voter_id,
            value: None,
            unvote: true,
            revote: false,
        }
    }

    pub fn with_value(mut self, value: VoteValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn revote(mut self) -> Self {
        self.revote = true;
        self
    }
}

/// A vote whose guarded write succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedVote {
    pub intent: VoteIntent,
    pub value: VoteValue,
}

/// Use-case service for voting on voteable entities.
pub struct VoteService<S: VoteStore> {
    store: S,
    config: Arc<VoteConfig>,
}

impl<S: VoteStore> VoteService<S> {
    pub fn new(store: S, config: Arc<VoteConfig>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &VoteConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists a new voteable with zeroed vote state.
    ///
    /// Vote state on the input is ignored; only votes change it afterwards.
    pub fn create_voteable(&self, voteable: &Voteable) -> Result<(), VoteError> {
        let fresh = Voteable {
            votes: VoteRecord::default(),
            ..voteable.clone()
        };
        self.store.insert_voteable(&fresh)?;
        Ok(())
    }

    pub fn voteable(
        &self,
        kind: &EntityKind,
        id: EntityId,
    ) -> Result<Option<Voteable>, VoteError> {
        Ok(self.store.find_voteable(kind, id)?)
    }

    /// Returns the side `voter_id` currently holds on the stored entity.
    pub fn current_vote_side(
        &self,
        kind: &EntityKind,
        id: EntityId,
        voter_id: VoterId,
    ) -> Result<Option<VoteValue>, VoteError> {
        let votee = self.load_votee(kind, id)?;
        Ok(votee.vote_side(voter_id))
    }

    /// Votes on the entity identified by `kind`/`votee_id`.
    ///
    /// # Errors
    /// - `NotFound` when the votee does not exist.
    /// - `NoOpVote` for a repeated vote or an unvote without a vote.
    /// - `GuardMismatch` when a concurrent transition won.
    pub fn vote(
        &self,
        kind: &EntityKind,
        votee_id: EntityId,
        request: &VoteRequest,
    ) -> Result<AppliedVote, VoteError> {
        let votee = self.load_votee(kind, votee_id)?;
        self.vote_on(&votee, request)
    }

    /// Votes on a caller-supplied instance.
    ///
    /// The voter's recorded side is read from `votee`; when that snapshot is
    /// stale the guarded write fails with `GuardMismatch`.
    pub fn vote_on(
        &self,
        votee: &Voteable,
        request: &VoteRequest,
    ) -> Result<AppliedVote, VoteError> {
        let weights = self
            .config
            .self_weights(&votee.kind)
            .ok_or_else(|| VoteError::NotVoteable(votee.kind.clone()))?;

        let (intent, value) = match resolve_intent(votee.vote_side(request.voter_id), request) {
            Ok(resolved) => resolved,
            Err(err) => {
                info!(
                    "event=vote module=vote status=rejected kind={} votee_id={} reason={}",
                    votee.kind, votee.id, err
                );
                return Err(err);
            }
        };

        let transition = resolve_transition(intent, value, request.voter_id, &weights);
        let applied = ConditionalUpdateExecutor::new(&self.store).apply(
            &votee.kind,
            votee.id,
            &transition,
        )?;
        if !applied {
            let err = self.classify_unmatched(votee, request.voter_id)?;
            info!(
                "event=vote module=vote status=rejected kind={} votee_id={} intent={} value={} reason={}",
                votee.kind, votee.id, intent, value, err
            );
            return Err(err);
        }

        info!(
            "event=vote module=vote status=ok kind={} votee_id={} intent={} value={}",
            votee.kind, votee.id, intent, value
        );

        let report =
            PropagationEngine::new(&self.config, &self.store).propagate(votee, intent, value);
        if !report.is_clean() {
            warn!(
                "event=vote module=vote status=partial kind={} votee_id={} propagation_failures={}",
                votee.kind,
                votee.id,
                report.failures.len()
            );
        }

        Ok(AppliedVote { intent, value })
    }

    fn load_votee(&self, kind: &EntityKind, id: EntityId) -> Result<Voteable, VoteError> {
        self.store
            .find_voteable(kind, id)?
            .ok_or_else(|| VoteError::NotFound {
                kind: kind.clone(),
                id,
            })
    }

    fn classify_unmatched(
        &self,
        votee: &Voteable,
        voter_id: VoterId,
    ) -> Result<VoteError, VoteError> {
        if self.store.find_voteable(&votee.kind, votee.id)?.is_none() {
            return Ok(VoteError::NotFound {
                kind: votee.kind.clone(),
                id: votee.id,
            });
        }
        Ok(VoteError::GuardMismatch {
            kind: votee.kind.clone(),
            id: votee.id,
            voter_id,
        })
    }
}

/// Derives intent and value from the voter's recorded side.
fn resolve_intent(
    current: Option<VoteValue>,
    request: &VoteRequest,
) -> Result<(VoteIntent, VoteValue), VoteError> {
    if request.unvote {
        let current = current.ok_or(VoteError::NoOpVote(NoOpReason::NotVoted))?;
        return Ok((VoteIntent::Unvote, request.value.unwrap_or(current)));
    }

    let value = request.value.ok_or(VoteError::MissingValue)?;
    match current {
        Some(side) if side == value => Err(VoteError::NoOpVote(NoOpReason::AlreadyVoted(value))),
        Some(_) => Ok((VoteIntent::Revote, value)),
        None if request.revote => Ok((VoteIntent::Revote, value)),
        None => Ok((VoteIntent::New, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_intent, NoOpReason, VoteError, VoteRequest};
    use crate::model::voteable::{VoteIntent, VoteValue};
    use uuid::Uuid;

    #[test]
    fn intent_follows_recorded_side() {
        let voter = Uuid::new_v4();
        let up = VoteRequest::up(voter);

        assert_eq!(
            resolve_intent(None, &up).unwrap(),
            (VoteIntent::New, VoteValue::Up)
        );
        assert_eq!(
            resolve_intent(Some(VoteValue::Down), &up).unwrap(),
            (VoteIntent::Revote, VoteValue::Up)
        );
        assert!(matches!(
            resolve_intent(Some(VoteValue::Up), &up),
            Err(VoteError::NoOpVote(NoOpReason::AlreadyVoted(VoteValue::Up)))
        ));
    }

    #[test]
    fn unvote_without_value_uses_recorded_side() {
        let request = VoteRequest::unvote(Uuid::new_v4());

        assert_eq!(
            resolve_intent(Some(VoteValue::Down), &request).unwrap(),
            (VoteIntent::Unvote, VoteValue::Down)
        );
        assert!(matches!(
            resolve_intent(None, &request),
            Err(VoteError::NoOpVote(NoOpReason::NotVoted))
        ));
    }

    #[test]
    fn unvote_with_value_but_no_recorded_side_is_noop() {
        let request = VoteRequest::unvote(Uuid::new_v4()).with_value(VoteValue::Up);
        assert!(matches!(
            resolve_intent(None, &request),
            Err(VoteError::NoOpVote(NoOpReason::NotVoted))
        ));
        assert_eq!(
            resolve_intent(Some(VoteValue::Down), &request).unwrap(),
            (VoteIntent::Unvote, VoteValue::Up)
        );
    }

    #[test]
    fn revote_hint_is_kept_for_unknown_prior_side() {
        let request = VoteRequest::down(Uuid::new_v4()).revote();
        assert_eq!(
            resolve_intent(None, &request).unwrap(),
            (VoteIntent::Revote, VoteValue::Down)
        );
    }

    #[test]
    fn missing_value_is_rejected_for_new_votes() {
        let request = VoteRequest {
            value: None,
            ..VoteRequest::up(Uuid::new_v4())
        };
        assert!(matches!(
            resolve_intent(None, &request),
            Err(VoteError::MissingValue)
        ));
    }
}
