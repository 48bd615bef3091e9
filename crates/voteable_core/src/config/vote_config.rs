//! Vote configuration table and builder.
//!
//! # Responsibility
//! - Map a votee kind to its own weights (the `(T, T)` entry) and to the
//!   ancestor kinds that receive cascaded counter updates.
//! - Resolve how a votee instance reaches each ancestor (`AncestorLink`).
//! - Load the same table from a JSON document.
//!
//! # Invariants
//! - The first registration of a `(votee, related)` pair wins.
//! - Every votee kind with ancestor entries has a self entry.

use crate::model::voteable::{
    validate_link_field, EntityId, EntityKind, VoteValue, Voteable, VoteableValidationError,
};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;

/// Largest absolute weight `VoteConfigBuilder::build` accepts.
pub const MAX_WEIGHT: i64 = 1_000_000_000;

/// Point weights for one `(votee, related)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteWeights {
    pub up: i64,
    pub down: i64,
    /// When `false`, only `vote_point` is cascaded to the related entity.
    pub propagate_counters: bool,
}

impl VoteWeights {
    pub fn new(up: i64, down: i64) -> Self {
        Self {
            up,
            down,
            propagate_counters: true,
        }
    }

    /// Cascades points only, leaving the related entity's counters alone.
    pub fn without_counters(mut self) -> Self {
        self.propagate_counters = false;
        self
    }

    pub fn point(&self, value: VoteValue) -> i64 {
        match value {
            VoteValue::Up => self.up,
            VoteValue::Down => self.down,
        }
    }
}

/// How a votee instance reaches the owning ancestor instance.
#[derive(Clone)]
pub enum AncestorLink {
    /// Reads `Voteable::links[field]`.
    ForeignKey(String),
    /// Static accessor resolved at registration time.
    Accessor(fn(&Voteable) -> Option<EntityId>),
}

impl AncestorLink {
    pub fn foreign_key(field: impl Into<String>) -> Self {
        Self::ForeignKey(field.into())
    }

    /// Returns the ancestor id, or `None` when the votee has no value.
    pub fn resolve(&self, votee: &Voteable) -> Option<EntityId> {
        match self {
            Self::ForeignKey(field) => votee.foreign_key(field),
            Self::Accessor(accessor) => accessor(votee),
        }
    }
}

impl Debug for AncestorLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForeignKey(field) => f.debug_tuple("ForeignKey").field(field).finish(),
            Self::Accessor(_) => f.write_str("Accessor(..)"),
        }
    }
}

/// One ancestor that receives cascaded updates from a votee kind.
#[derive(Debug, Clone)]
pub struct AncestorRule {
    pub kind: EntityKind,
    pub weights: VoteWeights,
    /// `None` when no relation was declared; propagation skips the entry.
    pub link: Option<AncestorLink>,
}

#[derive(Debug, Clone)]
struct VoteeRules {
    self_weights: VoteWeights,
    ancestors: Vec<AncestorRule>,
}

/// Configuration build/load errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Validation(VoteableValidationError),
    MissingSelfWeights(EntityKind),
    WeightOutOfRange {
        votee: EntityKind,
        related: EntityKind,
        weight: i64,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read vote config: {err}"),
            Self::Json(err) => write!(f, "invalid vote config document: {err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::MissingSelfWeights(kind) => {
                write!(f, "voteable kind `{kind}` has ancestors but no self weights")
            }
            Self::WeightOutOfRange {
                votee,
                related,
                weight,
            } => write!(
                f,
                "weight {weight} for ({votee}, {related}) exceeds +/-{MAX_WEIGHT}"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::MissingSelfWeights(_) | Self::WeightOutOfRange { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<VoteableValidationError> for ConfigError {
    fn from(value: VoteableValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Immutable vote configuration.
#[derive(Debug, Clone, Default)]
pub struct VoteConfig {
    rules: BTreeMap<EntityKind, VoteeRules>,
}

impl VoteConfig {
    pub fn builder() -> VoteConfigBuilder {
        VoteConfigBuilder::default()
    }

    /// Builds a config from a JSON document.
    ///
    /// ```json
    /// {"rules": [
    ///   {"votee": "comment", "related": "comment", "up": 1, "down": -1},
    ///   {"votee": "comment", "related": "post", "up": 2, "down": -1,
    ///    "propagate_counters": false, "foreign_key": "post_id"}
    /// ]}
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut builder = VoteConfigBuilder::default();
        builder.load_json(json)?;
        builder.build()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Weights applied to the votee itself.
    pub fn self_weights(&self, kind: &EntityKind) -> Option<VoteWeights> {
        self.rules.get(kind).map(|rules| rules.self_weights)
    }

    /// Ancestor entries for `kind`, excluding the self entry.
    pub fn ancestors(&self, kind: &EntityKind) -> &[AncestorRule] {
        self.rules
            .get(kind)
            .map(|rules| rules.ancestors.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_voteable(&self, kind: &EntityKind) -> bool {
        self.rules.contains_key(kind)
    }

    pub fn votee_kinds(&self) -> impl Iterator<Item = &EntityKind> {
        self.rules.keys()
    }
}

/// Setup-time builder for `VoteConfig`.
#[derive(Debug, Clone, Default)]
pub struct VoteConfigBuilder {
    weights: BTreeMap<(EntityKind, EntityKind), VoteWeights>,
    links: BTreeMap<(EntityKind, EntityKind), AncestorLink>,
}

impl VoteConfigBuilder {
    /// Registers weights for votes on `votee` as seen by `related`.
    ///
    /// `related == votee` supplies the votee's own weights. Later calls for
    /// an already registered pair are ignored.
    pub fn register(
        &mut self,
        votee: EntityKind,
        related: EntityKind,
        weights: VoteWeights,
    ) -> &mut Self {
        let key = (votee, related);
        if self.weights.contains_key(&key) {
            debug!(
                "event=vote_config_register module=config status=ignored votee={} related={}",
                key.0, key.1
            );
            return self;
        }
        self.weights.insert(key, weights);
        self
    }

    /// Declares how a `votee` instance reaches its `ancestor`. First wins.
    pub fn relate(
        &mut self,
        votee: EntityKind,
        ancestor: EntityKind,
        link: AncestorLink,
    ) -> &mut Self {
        let key = (votee, ancestor);
        if self.links.contains_key(&key) {
            debug!(
                "event=vote_config_relate module=config status=ignored votee={} ancestor={}",
                key.0, key.1
            );
            return self;
        }
        self.links.insert(key, link);
        self
    }

    /// Registers every rule of a JSON config document.
    pub fn load_json(&mut self, json: &str) -> Result<&mut Self, ConfigError> {
        let document: VoteConfigDocument = serde_json::from_str(json)?;
        for rule in document.rules {
            let weights = VoteWeights {
                up: rule.up,
                down: rule.down,
                propagate_counters: rule.propagate_counters,
            };
            if let Some(field) = rule.foreign_key {
                self.relate(
                    rule.votee.clone(),
                    rule.related.clone(),
                    AncestorLink::ForeignKey(field),
                );
            }
            self.register(rule.votee, rule.related, weights);
        }
        Ok(self)
    }

    /// Freezes the registrations into a `VoteConfig`.
    ///
    /// # Errors
    /// - `Validation` when a foreign-key field name is invalid.
    /// - `MissingSelfWeights` when a votee kind lacks its `(T, T)` entry.
    pub fn build(&self) -> Result<VoteConfig, ConfigError> {
        for link in self.links.values() {
            if let AncestorLink::ForeignKey(field) = link {
                validate_link_field(field)?;
            }
        }

        let mut self_weights: BTreeMap<EntityKind, VoteWeights> = BTreeMap::new();
        let mut ancestors: BTreeMap<EntityKind, Vec<AncestorRule>> = BTreeMap::new();
        for ((votee, related), weights) in &self.weights {
            for weight in [weights.up, weights.down] {
                if weight.unsigned_abs() > MAX_WEIGHT.unsigned_abs() {
                    return Err(ConfigError::WeightOutOfRange {
                        votee: votee.clone(),
                        related: related.clone(),
                        weight,
                    });
                }
            }
            if votee == related {
                self_weights.insert(votee.clone(), *weights);
                continue;
            }
            ancestors.entry(votee.clone()).or_default().push(AncestorRule {
                kind: related.clone(),
                weights: *weights,
                link: self.links.get(&(votee.clone(), related.clone())).cloned(),
            });
        }

        let mut rules = BTreeMap::new();
        for (votee, weights) in self_weights {
            let votee_ancestors = ancestors.remove(&votee).unwrap_or_default();
            rules.insert(
                votee,
                VoteeRules {
                    self_weights: weights,
                    ancestors: votee_ancestors,
                },
            );
        }
        if let Some(orphan) = ancestors.into_keys().next() {
            return Err(ConfigError::MissingSelfWeights(orphan));
        }

        Ok(VoteConfig { rules })
    }
}

#[derive(Debug, Deserialize)]
struct VoteConfigDocument {
    rules: Vec<VoteRuleEntry>,
}

#[derive(Debug, Deserialize)]
struct VoteRuleEntry {
    votee: EntityKind,
    related: EntityKind,
    up: i64,
    down: i64,
    #[serde(default = "default_propagate_counters")]
    propagate_counters: bool,
    #[serde(default)]
    foreign_key: Option<String>,
}

fn default_propagate_counters() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::{AncestorLink, ConfigError, VoteConfig, VoteWeights, MAX_WEIGHT};
    use crate::model::voteable::{EntityKind, VoteValue};

    fn kind(name: &str) -> EntityKind {
        EntityKind::new(name).unwrap()
    }

    #[test]
    fn first_registration_wins() {
        let config = VoteConfig::builder()
            .register(kind("post"), kind("post"), VoteWeights::new(1, -1))
            .register(kind("post"), kind("post"), VoteWeights::new(5, -5))
            .build()
            .unwrap();

        assert_eq!(config.self_weights(&kind("post")), Some(VoteWeights::new(1, -1)));
    }

    #[test]
    fn self_entry_is_not_an_ancestor() {
        let config = VoteConfig::builder()
            .register(kind("comment"), kind("comment"), VoteWeights::new(1, -3))
            .register(kind("comment"), kind("post"), VoteWeights::new(2, -1))
            .relate(kind("comment"), kind("post"), AncestorLink::foreign_key("post_id"))
            .build()
            .unwrap();

        let ancestors = config.ancestors(&kind("comment"));
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].kind, kind("post"));
        assert_eq!(ancestors[0].weights.point(VoteValue::Down), -1);
        assert!(ancestors[0].link.is_some());
    }

    #[test]
    fn ancestors_without_self_weights_are_rejected() {
        let err = VoteConfig::builder()
            .register(kind("comment"), kind("post"), VoteWeights::new(1, -1))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::MissingSelfWeights(k) if k == kind("comment")));
    }

    #[test]
    fn invalid_foreign_key_field_is_rejected_at_build() {
        let err = VoteConfig::builder()
            .register(kind("comment"), kind("comment"), VoteWeights::new(1, -1))
            .relate(kind("comment"), kind("post"), AncestorLink::foreign_key("Post-Id"))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn weights_beyond_limit_are_rejected() {
        let err = VoteConfig::builder()
            .register(kind("post"), kind("post"), VoteWeights::new(i64::MAX, -1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::WeightOutOfRange { weight, .. } if weight == i64::MAX));

        let err = VoteConfig::builder()
            .register(kind("comment"), kind("comment"), VoteWeights::new(1, -1))
            .register(kind("comment"), kind("post"), VoteWeights::new(1, i64::MIN))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::WeightOutOfRange { related, .. } if related == kind("post")
        ));

        let edge = VoteWeights::new(MAX_WEIGHT, -MAX_WEIGHT);
        let config = VoteConfig::builder()
            .register(kind("post"), kind("post"), edge)
            .build()
            .unwrap();
        assert_eq!(config.self_weights(&kind("post")), Some(edge));
    }
}
