use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{SqliteStore, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{CounterStore, LedgerStore, TaskStore};
use crate::types::{MetricCounter, TaskStatus, UsageAction, UsageTask};

const TASK_COLUMNS: &str = "id, user_id, repo_id, action, status, created_at, updated_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<UsageTask> {
    let action: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(UsageTask {
        id: row.get(0)?,
        user_id: row.get(1)?,
        repo_id: row.get(2)?,
        action: UsageAction::parse(&action).ok_or_else(|| invalid_text(3, &action))?,
        status: TaskStatus::parse(&status).ok_or_else(|| invalid_text(4, &status))?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn invalid_text(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unexpected value '{value}'").into(),
    )
}

fn counter_from_row(row: &Row<'_>) -> rusqlite::Result<MetricCounter> {
    Ok(MetricCounter {
        repo_id: row.get(0)?,
        metric_key: row.get(1)?,
        metric_value: row.get(2)?,
        updated_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

impl SqliteStore {
    /// Moves a task from `from` to `to`. Returns the number of rows moved.
    fn transition_task(&self, id: i64, from: TaskStatus, to: TaskStatus) -> Result<usize> {
        let rows = self.conn().execute(
            "UPDATE code_hub_counter_tasks SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![to.as_str(), format_datetime(&Utc::now()), id, from.as_str()],
        )?;
        Ok(rows)
    }
}

impl TaskStore for SqliteStore {
    fn insert_task(&self, repo_id: i64, user_id: i64, action: UsageAction) -> Result<i64> {
        let now = format_datetime(&Utc::now());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO code_hub_counter_tasks (user_id, repo_id, action, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                user_id,
                repo_id,
                action.as_str(),
                TaskStatus::Unlocked.as_str(),
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_task(&self, id: i64) -> Result<Option<UsageTask>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM code_hub_counter_tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_unlocked_tasks(&self) -> Result<Vec<UsageTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM code_hub_counter_tasks
             WHERE status = ?1 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![TaskStatus::Unlocked.as_str()], task_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn lock_task(&self, id: i64) -> Result<()> {
        match self.transition_task(id, TaskStatus::Unlocked, TaskStatus::Locked)? {
            0 => Err(Error::TaskAlreadyLocked(id)),
            _ => Ok(()),
        }
    }

    fn unlock_task(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE code_hub_counter_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                TaskStatus::Unlocked.as_str(),
                format_datetime(&Utc::now()),
                id
            ],
        )?;
        Ok(())
    }

    fn complete_task(&self, id: i64) -> Result<()> {
        self.transition_task(id, TaskStatus::Locked, TaskStatus::Done)?;
        Ok(())
    }

    fn delete_task(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "DELETE FROM code_hub_counter_tasks WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    fn unlock_stale_tasks(&self, locked_before: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn().execute(
            "UPDATE code_hub_counter_tasks SET status = ?1, updated_at = ?2
             WHERE status = ?3 AND updated_at < ?4",
            params![
                TaskStatus::Unlocked.as_str(),
                format_datetime(&Utc::now()),
                TaskStatus::Locked.as_str(),
                format_datetime(&locked_before)
            ],
        )?;
        Ok(rows)
    }
}

impl LedgerStore for SqliteStore {
    fn count_by_repo_user(&self, repo_id: i64, user_id: i64) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM code_hub_unique_usages WHERE repo_id = ?1 AND user_id = ?2",
            params![repo_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_by_repo(&self, repo_id: i64) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM code_hub_unique_usages WHERE repo_id = ?1",
            params![repo_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn insert_usage(&self, repo_id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO code_hub_unique_usages (repo_id, user_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![repo_id, user_id, format_datetime(&Utc::now())],
        )?;
        Ok(rows > 0)
    }

    fn delete_by_repo(&self, repo_id: i64) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM code_hub_unique_usages WHERE repo_id = ?1",
            params![repo_id],
        )?;
        Ok(rows)
    }
}

impl CounterStore for SqliteStore {
    fn list_counters(&self) -> Result<Vec<MetricCounter>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT repo_id, metric_key, metric_value, updated_at FROM internal_metric_counter
             ORDER BY repo_id, metric_key",
        )?;
        let rows = stmt.query_map([], counter_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_counter(&self, repo_id: i64, metric_key: &str) -> Result<Option<MetricCounter>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT repo_id, metric_key, metric_value, updated_at FROM internal_metric_counter
             WHERE repo_id = ?1 AND metric_key = ?2",
            params![repo_id, metric_key],
            counter_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn upsert_counter(&self, repo_id: i64, metric_key: &str, value: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO internal_metric_counter (repo_id, metric_key, metric_value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_id, metric_key)
             DO UPDATE SET metric_value = excluded.metric_value, updated_at = excluded.updated_at",
            params![repo_id, metric_key, value, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn update_counter(&self, repo_id: i64, metric_key: &str, value: i64) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE internal_metric_counter SET metric_value = ?1, updated_at = ?2
             WHERE repo_id = ?3 AND metric_key = ?4",
            params![value, format_datetime(&Utc::now()), repo_id, metric_key],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!(
                "counter {metric_key} for repository {repo_id}"
            )));
        }
        Ok(())
    }
}
