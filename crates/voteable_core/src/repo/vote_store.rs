//! Vote store contract and SQLite implementation.
//!
//! # Responsibility
//! - Define the storage seam the vote core consumes: read one entity,
//!   guarded match-then-mutate, unconditional counter increment.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - `conditional_update` applies its mutation iff the guard holds, in one
//!   atomic unit against one entity.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::model::voteable::{
    EntityId, EntityKind, VoteRecord, VoteValue, Voteable, VoteableValidationError,
};
use crate::vote::transition::{CounterDelta, CounterOverflow, VoteGuard, VoteMutation};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage error for vote persistence operations.
///
/// Also covers connection bootstrap and schema migration in `db`.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    NotFound { kind: EntityKind, id: EntityId },
    AlreadyExists { kind: EntityKind, id: EntityId },
    InvalidData(String),
    Validation(VoteableValidationError),
    /// Applying a delta would push a counter out of the `i64` range.
    CounterOverflow {
        kind: EntityKind,
        id: EntityId,
        source: CounterOverflow,
    },
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "vote store schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::AlreadyExists { kind, id } => write!(f, "{kind} already exists: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted vote data: {message}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::CounterOverflow { kind, id, source } => {
                write!(f, "{kind} {id}: {source}")
            }
            Self::Unavailable(message) => write!(f, "vote store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::CounterOverflow { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. }
            | Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::InvalidData(_)
            | Self::Unavailable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<VoteableValidationError> for StoreError {
    fn from(value: VoteableValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Result of a guarded update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether an entity satisfied the guard.
    pub matched: bool,
    /// Number of entities mutated.
    pub count: usize,
}

impl UpdateOutcome {
    pub fn unmatched() -> Self {
        Self {
            matched: false,
            count: 0,
        }
    }

    pub fn applied() -> Self {
        Self {
            matched: true,
            count: 1,
        }
    }
}

/// Storage operations required by the vote core.
pub trait VoteStore {
    fn insert_voteable(&self, voteable: &Voteable) -> StoreResult<()>;
    fn find_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<Option<Voteable>>;
    /// Applies `mutation` iff the entity currently satisfies `guard`.
    ///
    /// A missing entity is reported as unmatched, not as an error.
    fn conditional_update(
        &self,
        kind: &EntityKind,
        id: EntityId,
        guard: &VoteGuard,
        mutation: &VoteMutation,
    ) -> StoreResult<UpdateOutcome>;
    /// Adds `delta` to the entity's counters without any precondition.
    fn increment_counters(
        &self,
        kind: &EntityKind,
        id: EntityId,
        delta: &CounterDelta,
    ) -> StoreResult<()>;
    fn delete_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<()>;
}

impl<S: VoteStore + ?Sized> VoteStore for &S {
    fn insert_voteable(&self, voteable: &Voteable) -> StoreResult<()> {
        (**self).insert_voteable(voteable)
    }

    fn find_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<Option<Voteable>> {
        (**self).find_voteable(kind, id)
    }

    fn conditional_update(
        &self,
        kind: &EntityKind,
        id: EntityId,
        guard: &VoteGuard,
        mutation: &VoteMutation,
    ) -> StoreResult<UpdateOutcome> {
        (**self).conditional_update(kind, id, guard, mutation)
    }

    fn increment_counters(
        &self,
        kind: &EntityKind,
        id: EntityId,
        delta: &CounterDelta,
    ) -> StoreResult<()> {
        (**self).increment_counters(kind, id, delta)
    }

    fn delete_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<()> {
        (**self).delete_voteable(kind, id)
    }
}

impl<S: VoteStore + ?Sized> VoteStore for Arc<S> {
    fn insert_voteable(&self, voteable: &Voteable) -> StoreResult<()> {
        (**self).insert_voteable(voteable)
    }

    fn find_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<Option<Voteable>> {
        (**self).find_voteable(kind, id)
    }

    fn conditional_update(
        &self,
        kind: &EntityKind,
        id: EntityId,
        guard: &VoteGuard,
        mutation: &VoteMutation,
    ) -> StoreResult<UpdateOutcome> {
        (**self).conditional_update(kind, id, guard, mutation)
    }

    fn increment_counters(
        &self,
        kind: &EntityKind,
        id: EntityId,
        delta: &CounterDelta,
    ) -> StoreResult<()> {
        (**self).increment_counters(kind, id, delta)
    }

    fn delete_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<()> {
        (**self).delete_voteable(kind, id)
    }
}

/// SQLite-backed vote store.
///
/// Voter sets live in `voteable_votes`, one row per `(entity, voter)`, so a
/// voter can never hold both sides of the same entity.
pub struct SqliteVoteStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteVoteStore<'conn> {
    /// Constructs a store from a migrated connection (see `db::open_db`).
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl VoteStore for SqliteVoteStore<'_> {
    fn insert_voteable(&self, voteable: &Voteable) -> StoreResult<()> {
        voteable.validate()?;
        let kind = voteable.kind.as_str();
        let id = voteable.id.to_string();
        let record = &voteable.votes;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO voteables (
                entity_kind,
                entity_id,
                up_count,
                down_count,
                vote_count,
                vote_point
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                kind,
                id,
                record.up_count,
                record.down_count,
                record.vote_count,
                record.vote_point,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                kind: voteable.kind.clone(),
                id: voteable.id,
            });
        }

        for side in [VoteValue::Up, VoteValue::Down] {
            for voter in record.voter_ids(side) {
                tx.execute(
                    "INSERT INTO voteable_votes (entity_kind, entity_id, voter_id, side)
                     VALUES (?1, ?2, ?3, ?4);",
                    params![kind, id, voter.to_string(), side.as_str()],
                )?;
            }
        }
        for (field, target) in &voteable.links {
            tx.execute(
                "INSERT INTO voteable_links (entity_kind, entity_id, field, target_id)
                 VALUES (?1, ?2, ?3, ?4);",
                params![kind, id, field, target.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn find_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<Option<Voteable>> {
        let id_text = id.to_string();
        let mut stmt = self.conn.prepare(
            "SELECT up_count, down_count, vote_count, vote_point
             FROM voteables
             WHERE entity_kind = ?1 AND entity_id = ?2;",
        )?;
        let mut rows = stmt.query(params![kind.as_str(), id_text])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut votes = VoteRecord {
            up_count: row.get("up_count")?,
            down_count: row.get("down_count")?,
            vote_count: row.get("vote_count")?,
            vote_point: row.get("vote_point")?,
            ..VoteRecord::default()
        };
        load_voters(self.conn, kind, &id_text, &mut votes)?;

        let voteable = Voteable {
            kind: kind.clone(),
            id,
            votes,
            links: load_links(self.conn, kind, &id_text)?,
        };
        voteable.validate()?;
        Ok(Some(voteable))
    }

    fn conditional_update(
        &self,
        kind: &EntityKind,
        id: EntityId,
        guard: &VoteGuard,
        mutation: &VoteMutation,
    ) -> StoreResult<UpdateOutcome> {
        let id_text = id.to_string();
        let voter_text = guard.voter_id.to_string();
        let delta = &mutation.delta;

        let mut sql = String::from(
            "UPDATE voteables
             SET
                up_count = up_count + ?,
                down_count = down_count + ?,
                vote_count = vote_count + ?,
                vote_point = vote_point + ?
             WHERE entity_kind = ? AND entity_id = ?",
        );
        let mut bind_values: Vec<Value> = vec![
            Value::Integer(delta.up_count),
            Value::Integer(delta.down_count),
            Value::Integer(delta.vote_count),
            Value::Integer(delta.vote_point),
            Value::Text(kind.as_str().to_string()),
            Value::Text(id_text.clone()),
        ];

        let mut push_membership = |sql: &mut String, negate: bool, side: VoteValue| {
            sql.push_str(if negate { " AND NOT EXISTS (" } else { " AND EXISTS (" });
            sql.push_str(
                "SELECT 1 FROM voteable_votes v
                 WHERE v.entity_kind = voteables.entity_kind
                   AND v.entity_id = voteables.entity_id
                   AND v.voter_id = ?
                   AND v.side = ?)",
            );
            bind_values.push(Value::Text(voter_text.clone()));
            bind_values.push(Value::Text(side.as_str().to_string()));
        };
        if let Some(side) = guard.required_side {
            push_membership(&mut sql, false, side);
        }
        for side in &guard.forbidden_sides {
            push_membership(&mut sql, true, *side);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(&sql, params_from_iter(bind_values))?;
        if changed != 1 {
            return Ok(UpdateOutcome {
                matched: false,
                count: changed,
            });
        }
        ensure_integer_counters(&tx, kind, id, &id_text)?;

        let mutated_voter = mutation.voter_id.to_string();
        if let Some(side) = mutation.remove_from {
            tx.execute(
                "DELETE FROM voteable_votes
                 WHERE entity_kind = ?1 AND entity_id = ?2 AND voter_id = ?3 AND side = ?4;",
                params![kind.as_str(), id_text, mutated_voter, side.as_str()],
            )?;
        }
        if let Some(side) = mutation.add_to {
            tx.execute(
                "INSERT INTO voteable_votes (entity_kind, entity_id, voter_id, side)
                 VALUES (?1, ?2, ?3, ?4);",
                params![kind.as_str(), id_text, mutated_voter, side.as_str()],
            )?;
        }
        tx.commit()?;

        Ok(UpdateOutcome::applied())
    }

    fn increment_counters(
        &self,
        kind: &EntityKind,
        id: EntityId,
        delta: &CounterDelta,
    ) -> StoreResult<()> {
        let id_text = id.to_string();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE voteables
             SET
                up_count = up_count + ?1,
                down_count = down_count + ?2,
                vote_count = vote_count + ?3,
                vote_point = vote_point + ?4
             WHERE entity_kind = ?5 AND entity_id = ?6;",
            params![
                delta.up_count,
                delta.down_count,
                delta.vote_count,
                delta.vote_point,
                kind.as_str(),
                id_text,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: kind.clone(),
                id,
            });
        }
        ensure_integer_counters(&tx, kind, id, &id_text)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_voteable(&self, kind: &EntityKind, id: EntityId) -> StoreResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM voteables WHERE entity_kind = ?1 AND entity_id = ?2;",
            params![kind.as_str(), id.to_string()],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: kind.clone(),
                id,
            });
        }
        Ok(())
    }
}

const COUNTER_FIELDS: [&str; 4] = ["up_count", "down_count", "vote_count", "vote_point"];

/// SQLite turns an overflowing integer sum into a REAL; treat that as an
/// overflow so the caller's transaction rolls back.
fn ensure_integer_counters(
    conn: &Connection,
    kind: &EntityKind,
    id: EntityId,
    id_text: &str,
) -> StoreResult<()> {
    let overflowed: Option<i64> = conn.query_row(
        "SELECT CASE
            WHEN typeof(up_count) <> 'integer' THEN 0
            WHEN typeof(down_count) <> 'integer' THEN 1
            WHEN typeof(vote_count) <> 'integer' THEN 2
            WHEN typeof(vote_point) <> 'integer' THEN 3
         END
         FROM voteables
         WHERE entity_kind = ?1 AND entity_id = ?2;",
        params![kind.as_str(), id_text],
        |row| row.get(0),
    )?;
    let field = overflowed
        .and_then(|index| usize::try_from(index).ok())
        .and_then(|index| COUNTER_FIELDS.get(index).copied());
    match field {
        None => Ok(()),
        Some(field) => Err(StoreError::CounterOverflow {
            kind: kind.clone(),
            id,
            source: CounterOverflow { field },
        }),
    }
}

fn load_voters(
    conn: &Connection,
    kind: &EntityKind,
    id_text: &str,
    votes: &mut VoteRecord,
) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "SELECT voter_id, side
         FROM voteable_votes
         WHERE entity_kind = ?1 AND entity_id = ?2;",
    )?;
    let mut rows = stmt.query(params![kind.as_str(), id_text])?;
    while let Some(row) = rows.next()? {
        let voter_text: String = row.get("voter_id")?;
        let voter = parse_uuid(&voter_text, "voteable_votes.voter_id")?;
        let side_text: String = row.get("side")?;
        let side = VoteValue::parse(&side_text).ok_or_else(|| {
            StoreError::InvalidData(format!("invalid side `{side_text}` in voteable_votes.side"))
        })?;
        votes.voter_ids_mut(side).insert(voter);
    }
    Ok(())
}

fn load_links(
    conn: &Connection,
    kind: &EntityKind,
    id_text: &str,
) -> StoreResult<BTreeMap<String, EntityId>> {
    let mut stmt = conn.prepare(
        "SELECT field, target_id
         FROM voteable_links
         WHERE entity_kind = ?1 AND entity_id = ?2;",
    )?;
    let mut rows = stmt.query(params![kind.as_str(), id_text])?;
    let mut links = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let target_text: String = row.get("target_id")?;
        links.insert(
            row.get("field")?,
            parse_uuid(&target_text, "voteable_links.target_id")?,
        );
    }
    Ok(links)
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}
