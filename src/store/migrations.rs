use rusqlite::Connection;
use tracing::info;

use super::schema::{METRIC_COUNTER_V2, SCHEMA_V1};
use crate::error::Result;

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "base schema",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        description: "move code_hub_counter into internal_metric_counter",
        sql: METRIC_COUNTER_V2,
    },
];

pub fn current_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Applies pending migrations up to `target`. Each migration, including the
/// version bump, commits in its own transaction, so a failure leaves the
/// database at the previous version with nothing half-applied.
pub fn migrate_to(conn: &mut Connection, target: u32) -> Result<u32> {
    let start = current_version(conn)?;
    let mut version = start;

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > start && m.version <= target)
    {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;

        info!(
            "Applied migration {}: {}",
            migration.version, migration.description
        );
        version = migration.version;
    }

    Ok(version)
}

pub fn migrate(conn: &mut Connection) -> Result<u32> {
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);
    migrate_to(conn, latest)
}
