//! Voteable entity model.
//!
//! # Responsibility
//! - Define the embedded voting state carried by every voteable entity.
//! - Provide identity newtypes/aliases for entities, entity kinds and voters.
//!
//! # Invariants
//! - `up_voter_ids` and `down_voter_ids` are disjoint.
//! - A votee's own `up_count`/`down_count` never go negative through guarded
//!   transitions; cascaded ancestor counters may drift.
//! - `EntityKind` names and link field names match `^[a-z][a-z0-9_]{0,63}$`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid name regex"));

/// Stable identifier of a voteable entity.
pub type EntityId = Uuid;

/// Stable identifier of the identity casting a vote.
pub type VoterId = Uuid;

/// Validation errors for voteable identity and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteableValidationError {
    NilId,
    MalformedId(String),
    InvalidKind(String),
    InvalidLinkField(String),
    VoterInBothSets(VoterId),
}

impl Display for VoteableValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "id must not be nil"),
            Self::MalformedId(value) => write!(f, "malformed id `{value}`"),
            Self::InvalidKind(value) => write!(f, "invalid entity kind `{value}`"),
            Self::InvalidLinkField(value) => write!(f, "invalid link field `{value}`"),
            Self::VoterInBothSets(voter) => {
                write!(f, "voter {voter} is recorded as both up and down voter")
            }
        }
    }
}

impl Error for VoteableValidationError {}

/// Parses a textual id into an `EntityId`/`VoterId`.
///
/// Rejects malformed text and the nil uuid.
pub fn parse_id(value: &str) -> Result<Uuid, VoteableValidationError> {
    let trimmed = value.trim();
    let id = Uuid::parse_str(trimmed)
        .map_err(|_| VoteableValidationError::MalformedId(trimmed.to_string()))?;
    if id.is_nil() {
        return Err(VoteableValidationError::NilId);
    }
    Ok(id)
}

/// Name of a voteable entity type (the collection a record lives in).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKind(String);

impl EntityKind {
    /// Creates a validated entity kind.
    ///
    /// # Errors
    /// - `InvalidKind` when `name` is not a lowercase identifier.
    pub fn new(name: impl Into<String>) -> Result<Self, VoteableValidationError> {
        let name = name.into();
        if !NAME_RE.is_match(&name) {
            return Err(VoteableValidationError::InvalidKind(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityKind {
    type Error = VoteableValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityKind> for String {
    fn from(value: EntityKind) -> Self {
        value.0
    }
}

/// Side of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Stable lowercase name, also used as the persisted side value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

impl Display for VoteValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of state transition a vote request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteIntent {
    /// Voter had no vote; add one.
    New,
    /// Voter switches an existing vote to the other side.
    Revote,
    /// Voter withdraws an existing vote.
    Unvote,
}

impl VoteIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Revote => "revote",
            Self::Unvote => "unvote",
        }
    }
}

impl Display for VoteIntent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedded voting state of one entity.
///
/// On a votee, counters mirror the voter sets. On an ancestor that only
/// receives cascaded votes the sets stay empty and the counters hold
/// aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub up_voter_ids: BTreeSet<VoterId>,
    pub down_voter_ids: BTreeSet<VoterId>,
    pub up_count: i64,
    pub down_count: i64,
    pub vote_count: i64,
    pub vote_point: i64,
}

impl VoteRecord {
    /// Returns which side `voter_id` currently holds, if any.
    pub fn vote_side(&self, voter_id: VoterId) -> Option<VoteValue> {
        if self.up_voter_ids.contains(&voter_id) {
            return Some(VoteValue::Up);
        }
        if self.down_voter_ids.contains(&voter_id) {
            return Some(VoteValue::Down);
        }
        None
    }

    pub fn voter_ids(&self, side: VoteValue) -> &BTreeSet<VoterId> {
        match side {
            VoteValue::Up => &self.up_voter_ids,
            VoteValue::Down => &self.down_voter_ids,
        }
    }

    pub(crate) fn voter_ids_mut(&mut self, side: VoteValue) -> &mut BTreeSet<VoterId> {
        match side {
            VoteValue::Up => &mut self.up_voter_ids,
            VoteValue::Down => &mut self.down_voter_ids,
        }
    }

    /// Checks that no voter holds both sides.
    ///
    /// Counters are not checked: ancestor aggregates may drift after a failed
    /// cascade and must stay readable until an external sweep repairs them.
    pub fn validate(&self) -> Result<(), VoteableValidationError> {
        if let Some(voter) = self.up_voter_ids.intersection(&self.down_voter_ids).next() {
            return Err(VoteableValidationError::VoterInBothSets(*voter));
        }
        Ok(())
    }
}

/// An entity that can receive votes, with the foreign keys used to reach
/// its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voteable {
    pub kind: EntityKind,
    pub id: EntityId,
    pub votes: VoteRecord,
    /// Foreign-key field name -> owning entity id.
    #[serde(default)]
    pub links: BTreeMap<String, EntityId>,
}

impl Voteable {
    /// Creates a voteable with a generated id and zeroed vote state.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            id: Uuid::new_v4(),
            votes: VoteRecord::default(),
            links: BTreeMap::new(),
        }
    }

    /// Creates a voteable with a caller-provided id and zeroed vote state.
    pub fn with_id(kind: EntityKind, id: EntityId) -> Result<Self, VoteableValidationError> {
        if id.is_nil() {
            return Err(VoteableValidationError::NilId);
        }
        Ok(Self {
            kind,
            id,
            votes: VoteRecord::default(),
            links: BTreeMap::new(),
        })
    }

    /// Sets the foreign key `field` to `target`.
    pub fn link(
        mut self,
        field: impl Into<String>,
        target: EntityId,
    ) -> Result<Self, VoteableValidationError> {
        let field = field.into();
        validate_link_field(&field)?;
        self.links.insert(field, target);
        Ok(self)
    }

    pub fn foreign_key(&self, field: &str) -> Option<EntityId> {
        self.links.get(field).copied()
    }

    pub fn vote_side(&self, voter_id: VoterId) -> Option<VoteValue> {
        self.votes.vote_side(voter_id)
    }

    pub fn validate(&self) -> Result<(), VoteableValidationError> {
        if self.id.is_nil() {
            return Err(VoteableValidationError::NilId);
        }
        for field in self.links.keys() {
            validate_link_field(field)?;
        }
        self.votes.validate()
    }
}

pub(crate) fn validate_link_field(field: &str) -> Result<(), VoteableValidationError> {
    if NAME_RE.is_match(field) {
        Ok(())
    } else {
        Err(VoteableValidationError::InvalidLinkField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_id, EntityKind, VoteRecord, VoteValue, VoteableValidationError};
    use uuid::Uuid;

    #[test]
    fn entity_kind_rejects_non_identifiers() {
        assert!(EntityKind::new("comment").is_ok());
        assert!(EntityKind::new("forum_post2").is_ok());
        for bad in ["", "Comment", "2post", "post-id", "a b"] {
            assert!(
                matches!(
                    EntityKind::new(bad),
                    Err(VoteableValidationError::InvalidKind(_))
                ),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn parse_id_rejects_nil_and_garbage() {
        assert_eq!(parse_id(&Uuid::nil().to_string()), Err(VoteableValidationError::NilId));
        assert!(matches!(
            parse_id("not-a-uuid"),
            Err(VoteableValidationError::MalformedId(_))
        ));
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&format!(" {id} ")).unwrap(), id);
    }

    #[test]
    fn vote_side_reports_membership() {
        let up = Uuid::new_v4();
        let down = Uuid::new_v4();
        let mut record = VoteRecord::default();
        record.up_voter_ids.insert(up);
        record.down_voter_ids.insert(down);

        assert_eq!(record.vote_side(up), Some(VoteValue::Up));
        assert_eq!(record.vote_side(down), Some(VoteValue::Down));
        assert_eq!(record.vote_side(Uuid::new_v4()), None);
    }

    #[test]
    fn validate_rejects_voter_on_both_sides() {
        let voter = Uuid::new_v4();
        let mut record = VoteRecord::default();
        record.up_voter_ids.insert(voter);
        record.down_voter_ids.insert(voter);

        assert_eq!(
            record.validate(),
            Err(VoteableValidationError::VoterInBothSets(voter))
        );
    }

    #[test]
    fn validate_accepts_drifted_counters() {
        let record = VoteRecord {
            up_count: -1,
            down_count: -2,
            vote_count: -3,
            vote_point: 7,
            ..VoteRecord::default()
        };
        assert!(record.validate().is_ok());
    }
}
