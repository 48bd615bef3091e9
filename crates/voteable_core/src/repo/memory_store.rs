//! In-memory vote store.
//!
//! A single mutex serializes every operation, standing in for a store-side
//! compare-and-mutate: guards are evaluated and mutations applied under the
//! same lock acquisition.

use crate::model::voteable::{EntityId, EntityKind, Voteable};
use crate::repo::vote_store::{StoreError, StoreResult, UpdateOutcome, VoteStore};
use crate::vote::transition::{CounterDelta, VoteGuard, VoteMutation};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Documents = BTreeMap<(EntityKind, EntityId), Voteable>;

/// Lock-guarded in-memory `VoteStore`.
#[derive(Debug, Default)]
pub struct MemoryVoteStore {
    documents: Mutex<Documents>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored voteables.
    ///
    /// # Errors
    /// - `Unavailable` when a writer panicked while holding the lock.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Documents>> {
        self.documents
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl VoteStore for MemoryVoteStore {
    fn insert_voteable(&self, voteable: &Voteable) -> StoreResult<()> {
        voteable.validate()?;
        let mut documents = self.lock()?;
        let key = (voteable.kind.clone(), voteable.id);
        if documents.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.0,
                id: key.1,
            });
        }
        documents.insert(key, voteable.clone());
        Ok(())
    }

    fn find_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<Option<Voteable>> {
        Ok(self.lock()?.get(&(kind.clone(), id)).cloned())
    }

    fn conditional_update(
        &self,
        kind: &EntityKind,
        id: EntityId,
        guard: &VoteGuard,
        mutation: &VoteMutation,
    ) -> StoreResult<UpdateOutcome> {
        let mut documents = self.lock()?;
        let Some(voteable) = documents.get_mut(&(kind.clone(), id)) else {
            return Ok(UpdateOutcome::unmatched());
        };
        if !guard.matches(&voteable.votes) {
            return Ok(UpdateOutcome::unmatched());
        }
        mutation
            .apply_to(&mut voteable.votes)
            .map_err(|source| StoreError::CounterOverflow {
                kind: kind.clone(),
                id,
                source,
            })?;
        Ok(UpdateOutcome::applied())
    }

    fn increment_counters(
        &self,
        kind: &EntityKind,
        id: EntityId,
        delta: &CounterDelta,
    ) -> StoreResult<()> {
        let mut documents = self.lock()?;
        let voteable = documents
            .get_mut(&(kind.clone(), id))
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.clone(),
                id,
            })?;
        delta
            .apply_to(&mut voteable.votes)
            .map_err(|source| StoreError::CounterOverflow {
                kind: kind.clone(),
                id,
                source,
            })
    }

    fn delete_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<()> {
        self.lock()?
            .remove(&(kind.clone(), id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.clone(),
                id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryVoteStore;
    use crate::model::voteable::{EntityKind, Voteable};
    use crate::repo::vote_store::{StoreError, VoteStore};
    use crate::vote::transition::CounterDelta;
    use std::sync::Arc;

    fn post() -> Voteable {
        Voteable::new(EntityKind::new("post").unwrap())
    }

    #[test]
    fn len_counts_inserted_voteables() {
        let store = MemoryVoteStore::new();
        assert!(store.is_empty().unwrap());

        store.insert_voteable(&post()).unwrap();
        store.insert_voteable(&post()).unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn poisoned_lock_reports_unavailable() {
        let store = Arc::new(MemoryVoteStore::new());
        let poisoner = Arc::clone(&store);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.documents.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(joined.is_err());

        assert!(matches!(store.len(), Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.insert_voteable(&post()),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn overflowing_increment_is_rejected_and_leaves_counters() {
        let store = MemoryVoteStore::new();
        let post = post();
        store.insert_voteable(&post).unwrap();
        let big = CounterDelta {
            vote_point: i64::MAX,
            ..CounterDelta::default()
        };
        store.increment_counters(&post.kind, post.id, &big).unwrap();

        let err = store
            .increment_counters(&post.kind, post.id, &big)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::CounterOverflow { source, .. } if source.field == "vote_point"
        ));
        let stored = store.find_voteable(&post.kind, post.id).unwrap().unwrap();
        assert_eq!(stored.votes.vote_point, i64::MAX);
    }
}
