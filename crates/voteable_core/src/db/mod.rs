//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections backing `SqliteVoteStore`.
//! - Apply schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Vote data must not be read or written before migrations succeed.
//! - Bootstrap failures surface as `StoreError`, the same error the vote
//!   store reports.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};
