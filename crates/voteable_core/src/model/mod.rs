//! Voting domain model.
//!
//! # Responsibility
//! - Define the embedded per-entity voting state (`VoteRecord`).
//! - Define identity types shared by config, store and service layers.
//!
//! # Invariants
//! - A voter id appears in at most one of the up/down voter sets.
//! - A `VoteRecord` is zero-initialized when its owning entity is created.

pub mod voteable;
