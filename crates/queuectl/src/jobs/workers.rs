use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;

use crate::error::Result;
use crate::jobs::model::from_millis;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRecord {
    pub id: String,
    pub pid: i64,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    /// How long a heartbeat from this worker counts as fresh.
    pub stale_after_ms: i64,
    pub stop_requested: bool,
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: String,
    pid: i64,
    started_at: i64,
    heartbeat_at: i64,
    stale_after_ms: i64,
    stop_requested: bool,
}

impl From<WorkerRow> for WorkerRecord {
    fn from(row: WorkerRow) -> Self {
        WorkerRecord {
            id: row.id,
            pid: row.pid,
            started_at: from_millis(row.started_at),
            heartbeat_at: from_millis(row.heartbeat_at),
            stale_after_ms: row.stale_after_ms,
            stop_requested: row.stop_requested,
        }
    }
}

/// Persisted worker registry: heartbeats for crash detection and a stop flag
/// that other processes can raise.
#[derive(Clone)]
pub struct WorkersRepo {
    pool: SqlitePool,
}

impl WorkersRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register (or re-register) a worker. `stale_after` is how long its
    /// heartbeat stays fresh; sweeps in every process judge it by this value.
    pub async fn register(&self, worker_id: &str, pid: u32, stale_after: Duration) -> Result<()> {
        sqlx::query(concat!(
            r#"
            INSERT INTO workers (
                id, pid, started_at, heartbeat_at, stale_after_ms, stop_requested, stopped_at
            )
            VALUES (?, ?, "#,
            now_ms!(),
            ", ",
            now_ms!(),
            r#", ?, 0, NULL)
            ON CONFLICT(id) DO UPDATE
            SET pid = excluded.pid,
                started_at = excluded.started_at,
                heartbeat_at = excluded.heartbeat_at,
                stale_after_ms = excluded.stale_after_ms,
                stop_requested = 0,
                stopped_at = NULL
            "#
        ))
        .bind(worker_id)
        .bind(i64::from(pid))
        .bind(i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX / 2))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        sqlx::query(concat!(
            "UPDATE workers SET heartbeat_at = ",
            now_ms!(),
            " WHERE id = ? AND stopped_at IS NULL"
        ))
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stop_requested(&self, worker_id: &str) -> Result<bool> {
        let flag = sqlx::query_scalar::<_, bool>("SELECT stop_requested FROM workers WHERE id = ?")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(flag.unwrap_or(false))
    }

    pub async fn mark_stopped(&self, worker_id: &str) -> Result<()> {
        sqlx::query(concat!(
            "UPDATE workers SET stopped_at = ",
            now_ms!(),
            " WHERE id = ?"
        ))
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ask every running worker, in any process, to stop after its current job.
    pub async fn request_stop_all(&self) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE workers SET stop_requested = 1 WHERE stopped_at IS NULL AND stop_requested = 0",
        )
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Workers that have not stopped and whose last heartbeat is still fresh
    /// by their own registered window.
    pub async fn list_active(&self) -> Result<Vec<WorkerRecord>> {
        let rows = sqlx::query_as::<_, WorkerRow>(concat!(
            r#"
            SELECT id, pid, started_at, heartbeat_at, stale_after_ms, stop_requested
            FROM workers
            WHERE stopped_at IS NULL
              AND heartbeat_at + stale_after_ms >= "#,
            now_ms!(),
            r#"
            ORDER BY started_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WorkerRecord::from).collect())
    }
}
