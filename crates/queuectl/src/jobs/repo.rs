// crates/queuectl/src/jobs/repo.rs

use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobs::model::{Job, JobFilter, JobRow, JobState, NewJob};
use crate::jobs::retry::RetryDecision;

const DEFAULT_LIST_LIMIT: i64 = 1_000;

#[derive(Clone)]
pub struct JobsRepo {
    pool: SqlitePool,
    log_dir: PathBuf,
}

impl JobsRepo {
    pub fn new(pool: SqlitePool, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            log_dir: log_dir.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// One file per job, overwritten by each attempt.
    pub fn log_path_for(&self, job_id: &str) -> PathBuf {
        self.log_dir.join(format!("{job_id}.log"))
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    pub async fn enqueue(&self, job: NewJob) -> Result<String> {
        let res = sqlx::query(concat!(
            r#"
            INSERT INTO jobs (
                id, command, state, priority, run_at, attempts, max_retries,
                owner, claim_token, timeout_secs, log_path, created_at, updated_at
            )
            VALUES (?, ?, 'pending', ?, COALESCE(?, "#,
            now_ms!(),
            r#"), 0, ?, '', '', ?, ?, "#,
            now_ms!(),
            ", ",
            now_ms!(),
            ")"
        ))
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.priority)
        .bind(job.run_at.map(|t| t.timestamp_millis()))
        .bind(job.max_retries)
        .bind(job.timeout_secs)
        .bind(&job.log_path)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::DuplicateId(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Job::from))
    }

    /// Jobs in arrival order, optionally restricted to one state.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 10_000);

        let rows = match filter.state {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    SELECT * FROM jobs
                    WHERE state = ?
                    ORDER BY created_at ASC, rowid ASC
                    LIMIT ?
                    "#,
                )
                .bind(state)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    SELECT * FROM jobs
                    ORDER BY created_at ASC, rowid ASC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Job::from).collect())
    }

    pub async fn count_by_state(&self) -> Result<Vec<(JobState, i64)>> {
        let rows = sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Output of the job's latest attempt, if it has run.
    pub async fn read_log(&self, job_id: &str) -> Result<Option<String>> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("job {job_id}")))?;

        match tokio::fs::read(Path::new(&job.log_path)).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ----------------------------
    // Claim protocol
    // ----------------------------

    /// Best eligible job: highest priority first, then arrival order.
    /// Jobs whose `run_at` is in the future are never candidates.
    pub async fn select_candidate(&self) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(concat!(
            r#"
            SELECT * FROM jobs
            WHERE state = 'pending'
              AND run_at <= "#,
            now_ms!(),
            r#"
            ORDER BY priority DESC, created_at ASC, rowid ASC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Job::from))
    }

    /// Conditionally move `candidate` from pending to claimed by `worker_id`.
    ///
    /// Succeeds only if the row is unchanged since `candidate` was read
    /// (same revision, still pending, unowned). Returns `None` when another
    /// worker got there first.
    ///
    /// The attempt deadline is fixed here: claim time plus the job's own
    /// timeout, or `default_timeout` when the job has none.
    pub async fn try_claim(
        &self,
        candidate: &Job,
        worker_id: &str,
        default_timeout: Duration,
    ) -> Result<Option<Job>> {
        let token = Uuid::new_v4().to_string();

        let row = sqlx::query_as::<_, JobRow>(concat!(
            r#"
            UPDATE jobs
            SET state = 'claimed',
                owner = ?,
                claim_token = ?,
                claimed_at = "#,
            now_ms!(),
            r#",
                deadline_at = "#,
            now_ms!(),
            r#" + COALESCE(timeout_secs * 1000, ?),
                updated_at = "#,
            now_ms!(),
            r#",
                revision = revision + 1
            WHERE id = ?
              AND state = 'pending'
              AND owner = ''
              AND revision = ?
            RETURNING *
            "#
        ))
        .bind(worker_id)
        .bind(&token)
        .bind(duration_ms(default_timeout))
        .bind(&candidate.id)
        .bind(candidate.revision)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    /// Select and claim the next eligible job, re-selecting from scratch after
    /// every lost race. `None` means nothing is eligible right now.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        default_timeout: Duration,
    ) -> Result<Option<Job>> {
        loop {
            let Some(candidate) = self.select_candidate().await? else {
                return Ok(None);
            };

            if let Some(job) = self.try_claim(&candidate, worker_id, default_timeout).await? {
                return Ok(Some(job));
            }

            debug!(
                worker_id,
                job_id = %candidate.id,
                "claim conflict, re-selecting"
            );
        }
    }

    // ----------------------------
    // Outcome commits
    // ----------------------------

    /// claimed -> completed. Counts the attempt in the same statement.
    pub async fn mark_completed(&self, job: &Job, exit_code: Option<i64>) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(concat!(
            r#"
            UPDATE jobs
            SET state = 'completed',
                attempts = attempts + 1,
                owner = '',
                claim_token = '',
                claimed_at = NULL,
                deadline_at = NULL,
                last_exit_code = ?,
                last_error = NULL,
                updated_at = "#,
            now_ms!(),
            r#",
                revision = revision + 1
            WHERE id = ?
              AND state = 'claimed'
              AND claim_token = ?
            RETURNING *
            "#
        ))
        .bind(exit_code)
        .bind(&job.id)
        .bind(&job.claim_token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::from)
            .ok_or_else(|| QueueError::ClaimLost(job.id.clone()))
    }

    /// claimed -> pending (with backoff) or dead, per `decision`.
    ///
    /// `decision` must have been computed for `job.attempts + 1`; the attempt
    /// counter is incremented in the same statement as the transition.
    pub async fn mark_failed(
        &self,
        job: &Job,
        decision: RetryDecision,
        exit_code: Option<i64>,
        error: &str,
    ) -> Result<Job> {
        let row = match decision {
            RetryDecision::Retry { delay } => {
                sqlx::query_as::<_, JobRow>(concat!(
                    r#"
                    UPDATE jobs
                    SET state = 'pending',
                        attempts = attempts + 1,
                        run_at = "#,
                    now_ms!(),
                    r#" + ?,
                        owner = '',
                        claim_token = '',
                        claimed_at = NULL,
                        deadline_at = NULL,
                        last_exit_code = ?,
                        last_error = ?,
                        updated_at = "#,
                    now_ms!(),
                    r#",
                        revision = revision + 1
                    WHERE id = ?
                      AND state = 'claimed'
                      AND claim_token = ?
                    RETURNING *
                    "#
                ))
                .bind(duration_ms(delay))
                .bind(exit_code)
                .bind(error)
                .bind(&job.id)
                .bind(&job.claim_token)
                .fetch_optional(&self.pool)
                .await?
            }
            RetryDecision::Dead => {
                sqlx::query_as::<_, JobRow>(concat!(
                    r#"
                    UPDATE jobs
                    SET state = 'dead',
                        attempts = attempts + 1,
                        owner = '',
                        claim_token = '',
                        claimed_at = NULL,
                        deadline_at = NULL,
                        last_exit_code = ?,
                        last_error = ?,
                        updated_at = "#,
                    now_ms!(),
                    r#",
                        revision = revision + 1
                    WHERE id = ?
                      AND state = 'claimed'
                      AND claim_token = ?
                    RETURNING *
                    "#
                ))
                .bind(exit_code)
                .bind(error)
                .bind(&job.id)
                .bind(&job.claim_token)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(Job::from)
            .ok_or_else(|| QueueError::ClaimLost(job.id.clone()))
    }

    // ----------------------------
    // Crash recovery
    // ----------------------------

    /// Claimed jobs nobody is going to finish: past the deadline fixed at
    /// claim time plus `grace`, or owned by a worker whose heartbeat is
    /// older than that worker's own staleness window (never less than `grace`).
    pub async fn find_stale_claims(&self, grace: Duration) -> Result<Vec<Job>> {
        let grace_ms = duration_ms(grace);
        let rows = sqlx::query_as::<_, JobRow>(concat!(
            r#"
            SELECT j.*
            FROM jobs j
            LEFT JOIN workers w ON w.id = j.owner
            WHERE j.state = 'claimed'
              AND (
                    j.deadline_at IS NULL
                 OR j.deadline_at + ? < "#,
            now_ms!(),
            r#"
                 OR w.id IS NULL
                 OR w.stopped_at IS NOT NULL
                 OR w.heartbeat_at + MAX(w.stale_after_ms, ?) < "#,
            now_ms!(),
            r#"
              )
            ORDER BY j.claimed_at ASC
            "#
        ))
        .bind(grace_ms)
        .bind(grace_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    // ----------------------------
    // Dead-letter queue
    // ----------------------------

    pub async fn list_dead(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'dead'
            ORDER BY updated_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    /// dead -> pending with attempts reset and `run_at = now`.
    pub async fn resurrect(&self, job_id: &str) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(concat!(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                run_at = "#,
            now_ms!(),
            r#",
                owner = '',
                claim_token = '',
                claimed_at = NULL,
                deadline_at = NULL,
                updated_at = "#,
            now_ms!(),
            r#",
                revision = revision + 1
            WHERE id = ?
              AND state = 'dead'
            RETURNING *
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::from)
            .ok_or_else(|| QueueError::NotFound(format!("no dead job with id {job_id}")))
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
