mod directory;
mod policy;
mod tenancy;
mod usage;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode};

use super::migrations;
use crate::error::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Applies all pending schema migrations.
    pub fn initialize(&self) -> Result<()> {
        let mut conn = self.conn();
        migrations::migrate(&mut conn)?;
        Ok(())
    }

    /// Applies migrations up to `version` only. Used to stage upgrades.
    pub fn initialize_to(&self, version: u32) -> Result<()> {
        let mut conn = self.conn();
        migrations::migrate_to(&mut conn, version)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32> {
        migrations::current_version(&self.conn())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

/// Fixed-width UTC timestamps, so text comparison matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Returns the SQLite message when `err` is a constraint violation.
fn constraint_violation(err: &rusqlite::Error) -> Option<String> {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            Some(msg.clone().unwrap_or_default())
        }
        _ => None,
    }
}

fn map_conflict(err: rusqlite::Error, what: &str) -> Error {
    match constraint_violation(&err) {
        Some(_) => Error::AlreadyExists(what.to_string()),
        None => Error::Database(err),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CounterStore;
    use tempfile::TempDir;

    fn table_names(store: &SqliteStore) -> Vec<String> {
        let conn = store.conn();
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();

        let tables = table_names(&store);
        for expected in [
            "sc_tenant",
            "sc_tenant_organizations",
            "code_hub_counter_tasks",
            "code_hub_unique_usages",
            "internal_metric_counter",
            "sc_repo_key",
            "role_bindings",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(!tables.contains(&"code_hub_counter".to_string()));
        assert_eq!(store.schema_version().unwrap(), 2);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        store.initialize().unwrap();
        assert_eq!(store.schema_version().unwrap(), 2);
    }

    #[test]
    fn test_counter_migration_copies_legacy_rows() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize_to(1).unwrap();

        store
            .conn()
            .execute_batch(
                "INSERT INTO code_hub_counter (repo_id, num_uniq_usages, updated_at)
                 VALUES (11, 4, '2024-01-01 10:00:00'), (12, 0, NULL);",
            )
            .unwrap();

        store.initialize().unwrap();

        let counter = store.get_counter(11, "unique_clones").unwrap().unwrap();
        assert_eq!(counter.metric_value, 4);
        let empty = store.get_counter(12, "unique_clones").unwrap().unwrap();
        assert_eq!(empty.metric_value, 0);
        assert!(!table_names(&store).contains(&"code_hub_counter".to_string()));
    }

    #[test]
    fn test_format_datetime_sorts_lexically() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T00:00:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2024-01-01T00:00:10.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_datetime(&early) < format_datetime(&late));
        assert_eq!(parse_datetime(&format_datetime(&late)), late);
    }
}
