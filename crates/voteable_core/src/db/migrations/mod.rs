//! Vote store schema migrations.
//!
//! # Invariants
//! - Steps are ordered by strictly increasing `version`.
//! - All pending steps commit together; `PRAGMA user_version` records the
//!   last applied step.

use crate::repo::vote_store::{StoreError, StoreResult};
use log::{debug, info};
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "voteables",
        sql: include_str!("0001_voteables.sql"),
    },
    SchemaStep {
        version: 2,
        name: "voteable_links",
        sql: include_str!("0002_voteable_links.sql"),
    },
];

/// Schema version this build writes.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Brings the vote schema on `conn` up to `latest_version()`.
///
/// Returns the schema version found before migrating.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the database was written by a newer build.
pub fn apply_migrations(conn: &mut Connection) -> StoreResult<u32> {
    let found: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if found > latest {
        return Err(StoreError::UnsupportedSchemaVersion {
            db_version: found,
            latest_supported: latest,
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > found)
        .collect();
    if pending.is_empty() {
        return Ok(found);
    }

    let tx = conn.transaction()?;
    for step in pending {
        debug!(
            "event=db_migrate module=db status=step version={} name={}",
            step.version, step.name
        );
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        found, latest
    );
    Ok(found)
}
