//! Vote-backed counters on arbitrary entities.
//!
//! Voters cast up/down votes on a votee; each accepted transition is applied
//! through one guarded write and then cascaded, weight-scaled, to the
//! votee's configured ancestors.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod vote;

pub use config::vote_config::{
    AncestorLink, AncestorRule, ConfigError, VoteConfig, VoteConfigBuilder, VoteWeights, MAX_WEIGHT,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::voteable::{
    parse_id, EntityId, EntityKind, VoteIntent, VoteRecord, VoteValue, Voteable,
    VoteableValidationError, VoterId,
};
pub use repo::memory_store::MemoryVoteStore;
pub use repo::vote_store::{SqliteVoteStore, StoreError, StoreResult, UpdateOutcome, VoteStore};
pub use service::vote_service::{AppliedVote, NoOpReason, VoteError, VoteRequest, VoteService};
pub use vote::executor::ConditionalUpdateExecutor;
pub use vote::propagation::{PropagationEngine, PropagationFailure, PropagationReport};
pub use vote::transition::{
    resolve_transition, CounterDelta, CounterOverflow, VoteGuard, VoteMutation, VoteTransition,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
