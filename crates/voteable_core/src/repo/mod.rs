//! Vote store abstractions and implementations.
//!
//! # Responsibility
//! - Define the storage contract consumed by the vote core.
//! - Provide a SQLite store and a lock-guarded in-memory store.
//!
//! # Invariants
//! - Writes validate the voteable before persistence.
//! - Guarded updates are atomic per entity; increments are unconditional.

pub mod memory_store;
pub mod vote_store;
