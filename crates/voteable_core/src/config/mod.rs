//! Vote weight and relation configuration.
//!
//! # Responsibility
//! - Hold the per-votee-type table of point weights and ancestor relations.
//! - Freeze the table once at startup into an immutable, shareable value.
//!
//! # Invariants
//! - Registration is first-wins per `(votee, related)` pair.
//! - A built `VoteConfig` is never mutated; share it through `Arc`.

pub mod vote_config;
