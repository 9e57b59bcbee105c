//! The persistent state the scheduler needs: CRUD for [`Execution`] records and their
//! append-only log. Rule definitions themselves are owned by the external management
//! plane and never touch this store — the scheduler only ever receives a typed
//! [`crate::model::ReplicationRule`] at `ExecuteRule` time.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::model::{Execution, ExecutionCounters, ExecutionLogEntry, ExecutionStatus, LogLevel};
use crate::{ReplicoreError, ReplicoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The storage seam the scheduler drives every execution through. A production
/// deployment may swap in a different backing store without touching the scheduler.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persists a newly created execution, in `Pending` status.
    async fn create_execution(&self, execution: &Execution) -> ReplicoreResult<()>;

    /// Transitions an execution's status. Implementations must make terminal
    /// statuses write-once, mirroring [`Execution::finish`].
    async fn set_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_summary: Option<String>,
        ended_at: Option<DateTime<Utc>>,
    ) -> ReplicoreResult<()>;

    /// Overwrites an execution's counters snapshot.
    async fn update_counters(&self, execution_id: &str, counters: ExecutionCounters) -> ReplicoreResult<()>;

    /// Appends one entry to an execution's log. Never mutates or removes prior entries.
    async fn append_log(&self, entry: &ExecutionLogEntry) -> ReplicoreResult<()>;

    /// Returns every entry recorded for `execution_id`, oldest first.
    async fn read_log(&self, execution_id: &str) -> ReplicoreResult<Vec<ExecutionLogEntry>>;

    /// Fetches one execution by id, if it exists.
    async fn get_execution(&self, execution_id: &str) -> ReplicoreResult<Option<Execution>>;
}

/// A `sqlx`-backed [`ExecutionStore`] sufficient to make the scheduler runnable and
/// testable; schema is managed by the migrations bundled under `lib/migrations`.
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Opens (creating if absent) a SQLite database at `path` and runs pending
    /// migrations.
    pub async fn connect(path: impl AsRef<Path>) -> ReplicoreResult<Self> {
        let path = path.as_ref();
        let in_memory = path == Path::new(":memory:");
        if !in_memory {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;
            }
        }
        let url = if in_memory { "sqlite::memory:".to_string() } else { format!("sqlite://{}", path.display()) };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?
            .create_if_missing(true);

        // A pooled connection per query would each see its own empty in-memory
        // database, so cap the pool at one connection for ":memory:".
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        sqlx::migrate!("lib/migrations/executions")
            .run(&pool)
            .await
            .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        crate::Ok(SqliteExecutionStore { pool })
    }

    /// Builds a store around an already-open, already-migrated pool. Primarily for
    /// tests that share an in-memory pool across assertions.
    pub fn from_pool(pool: SqlitePool) -> Self {
        SqliteExecutionStore { pool }
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Success => "success",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Canceled => "canceled",
    }
}

fn status_from_str(s: &str) -> ReplicoreResult<ExecutionStatus> {
    crate::Ok(match s {
        "pending" => ExecutionStatus::Pending,
        "running" => ExecutionStatus::Running,
        "success" => ExecutionStatus::Success,
        "failed" => ExecutionStatus::Failed,
        "canceled" => ExecutionStatus::Canceled,
        other => return Err(ReplicoreError::custom(anyhow::anyhow!("unknown execution status '{other}'"))),
    })
}

fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn level_from_str(s: &str) -> ReplicoreResult<LogLevel> {
    crate::Ok(match s {
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        other => return Err(ReplicoreError::custom(anyhow::anyhow!("unknown log level '{other}'"))),
    })
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn create_execution(&self, execution: &Execution) -> ReplicoreResult<()> {
        sqlx::query(
            "INSERT INTO executions (id, rule_id, status, started_at, ended_at, \
             total_blobs, synced_blobs, skipped_blobs, failed_blobs, bytes_synced, error_summary) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.get_id())
        .bind(execution.get_rule_id())
        .bind(status_str(*execution.get_status()))
        .bind(execution.get_started_at())
        .bind(execution.get_ended_at())
        .bind(execution.get_counters().total_blobs as i64)
        .bind(execution.get_counters().synced_blobs as i64)
        .bind(execution.get_counters().skipped_blobs as i64)
        .bind(execution.get_counters().failed_blobs as i64)
        .bind(execution.get_counters().bytes_synced as i64)
        .bind(execution.get_error_summary())
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        crate::Ok(())
    }

    async fn set_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_summary: Option<String>,
        ended_at: Option<DateTime<Utc>>,
    ) -> ReplicoreResult<()> {
        // Terminal statuses are write-once: the WHERE clause only lets the update
        // through while the row is still pending/running.
        sqlx::query(
            "UPDATE executions SET status = ?, error_summary = ?, ended_at = ? \
             WHERE id = ? AND status NOT IN ('success', 'failed', 'canceled')",
        )
        .bind(status_str(status))
        .bind(error_summary)
        .bind(ended_at)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        crate::Ok(())
    }

    async fn update_counters(&self, execution_id: &str, counters: ExecutionCounters) -> ReplicoreResult<()> {
        sqlx::query(
            "UPDATE executions SET total_blobs = ?, synced_blobs = ?, skipped_blobs = ?, \
             failed_blobs = ?, bytes_synced = ? WHERE id = ?",
        )
        .bind(counters.total_blobs as i64)
        .bind(counters.synced_blobs as i64)
        .bind(counters.skipped_blobs as i64)
        .bind(counters.failed_blobs as i64)
        .bind(counters.bytes_synced as i64)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        crate::Ok(())
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> ReplicoreResult<()> {
        sqlx::query("INSERT INTO execution_logs (execution_id, level, timestamp, message) VALUES (?, ?, ?, ?)")
            .bind(&entry.execution_id)
            .bind(level_str(entry.level))
            .bind(entry.timestamp)
            .bind(&entry.message)
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        crate::Ok(())
    }

    async fn read_log(&self, execution_id: &str) -> ReplicoreResult<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query(
            "SELECT execution_id, level, timestamp, message FROM execution_logs \
             WHERE execution_id = ? ORDER BY id ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let level: String = row.try_get("level").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;
            entries.push(ExecutionLogEntry {
                execution_id: row.try_get("execution_id").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?,
                level: level_from_str(&level)?,
                timestamp: row.try_get("timestamp").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?,
                message: row.try_get("message").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?,
            });
        }
        crate::Ok(entries)
    }

    async fn get_execution(&self, execution_id: &str) -> ReplicoreResult<Option<Execution>> {
        let row = sqlx::query(
            "SELECT id, rule_id, status, started_at, ended_at, total_blobs, synced_blobs, \
             skipped_blobs, failed_blobs, bytes_synced, error_summary FROM executions WHERE id = ?",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        let Some(row) = row else { return crate::Ok(None) };

        let status: String = row.try_get("status").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;
        let id: String = row.try_get("id").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;
        let rule_id: String = row.try_get("rule_id").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;
        let started_at: DateTime<Utc> = row.try_get("started_at").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?;

        let mut execution = Execution::new(id, rule_id, started_at);
        execution.set_status(status_from_str(&status)?);
        execution.set_ended_at(row.try_get("ended_at").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?);
        execution.set_error_summary(row.try_get("error_summary").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))?);
        execution.set_counters(ExecutionCounters {
            total_blobs: row.try_get::<i64, _>("total_blobs").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))? as u64,
            synced_blobs: row.try_get::<i64, _>("synced_blobs").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))? as u64,
            skipped_blobs: row.try_get::<i64, _>("skipped_blobs").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))? as u64,
            failed_blobs: row.try_get::<i64, _>("failed_blobs").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))? as u64,
            bytes_synced: row.try_get::<i64, _>("bytes_synced").map_err(|e| ReplicoreError::custom(anyhow::anyhow!(e)))? as u64,
        });

        crate::Ok(Some(execution))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteExecutionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        sqlx::migrate!("lib/migrations/executions").run(&pool).await.expect("run migrations");
        SqliteExecutionStore::from_pool(pool)
    }

    #[tokio::test]
    async fn test_create_and_fetch_round_trips() {
        let store = memory_store().await;
        let execution = Execution::new("e1", "r1", Utc::now());
        store.create_execution(&execution).await.unwrap();

        let fetched = store.get_execution("e1").await.unwrap().expect("execution present");
        assert_eq!(*fetched.get_id(), "e1".to_string());
        assert_eq!(*fetched.get_status(), ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminal_status_is_write_once() {
        let store = memory_store().await;
        let execution = Execution::new("e1", "r1", Utc::now());
        store.create_execution(&execution).await.unwrap();

        store.set_status("e1", ExecutionStatus::Success, None, Some(Utc::now())).await.unwrap();
        store.set_status("e1", ExecutionStatus::Failed, Some("late".into()), Some(Utc::now())).await.unwrap();

        let fetched = store.get_execution("e1").await.unwrap().unwrap();
        assert_eq!(*fetched.get_status(), ExecutionStatus::Success);
        assert!(fetched.get_error_summary().is_none());
    }

    #[tokio::test]
    async fn test_log_entries_preserve_order() {
        let store = memory_store().await;
        let execution = Execution::new("e1", "r1", Utc::now());
        store.create_execution(&execution).await.unwrap();

        for i in 0..3 {
            store
                .append_log(&ExecutionLogEntry {
                    execution_id: "e1".into(),
                    level: LogLevel::Info,
                    timestamp: Utc::now(),
                    message: format!("line {i}"),
                })
                .await
                .unwrap();
        }

        let log = store.read_log("e1").await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].message, "line 0");
        assert_eq!(log[2].message, "line 2");
    }
}
