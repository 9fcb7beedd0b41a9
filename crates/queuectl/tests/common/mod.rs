#![allow(dead_code)]

use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tempfile::TempDir;

use queuectl::db;
use queuectl::jobs::{
    ExecutionOutcome, Job, JobRunner, JobSpec, JobState, Queue, WorkerConfig,
};

/// Default attempt timeout for tests that claim through the repo directly.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// A queue on a fresh store file. The directory is removed on drop.
pub struct TestQueue {
    pub queue: Queue,
    pub pool: SqlitePool,
    pub dir: TempDir,
}

impl TestQueue {
    pub fn runner(&self) -> JobRunner {
        JobRunner::new(self.queue.jobs().clone(), self.queue.config().clone())
    }
}

pub async fn setup_queue() -> TestQueue {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());

    let pool = db::make_pool(&url).await.expect("failed to open test store");
    db::run_migrations(&pool).await.expect("migrations failed");

    let queue = Queue::new(pool.clone(), dir.path().join("logs"));
    TestQueue { queue, pool, dir }
}

pub fn fast_worker(id: &str) -> WorkerConfig {
    WorkerConfig::new(id)
        .poll_interval(Duration::from_millis(50))
        .heartbeat_interval(Duration::from_millis(200))
        .reap_interval(Duration::from_millis(200))
}

pub async fn enqueue(tq: &TestQueue, id: &str, command: &str) -> String {
    tq.queue
        .enqueue(JobSpec::new(id, command))
        .await
        .expect("enqueue")
}

/// Make a backed-off job eligible right away.
pub async fn make_due(pool: &SqlitePool, id: &str) {
    sqlx::query("UPDATE jobs SET run_at = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .expect("make_due");
}

/// Pretend `worker` last heartbeated `ago` earlier than it did.
pub async fn backdate_heartbeat(pool: &SqlitePool, worker: &str, ago: Duration) {
    sqlx::query("UPDATE workers SET heartbeat_at = heartbeat_at - ? WHERE id = ?")
        .bind(ago.as_millis() as i64)
        .bind(worker)
        .execute(pool)
        .await
        .expect("backdate_heartbeat");
}

/// Claim the next job as `worker` and commit a failed attempt for it.
pub async fn claim_and_fail(tq: &TestQueue, worker: &str) -> Job {
    let job = tq
        .queue
        .claim_next(worker)
        .await
        .expect("claim")
        .expect("a job to be eligible");
    tq.runner()
        .commit_outcome(&job, &ExecutionOutcome::Exited { code: 1 })
        .await
        .expect("commit failure")
}

pub async fn wait_for_state(tq: &TestQueue, id: &str, state: JobState, within: Duration) -> Job {
    let deadline = Instant::now() + within;
    loop {
        let job = tq.queue.get_status(id).await.expect("get_status");
        if job.state == state {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} stuck in {} (wanted {state})",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
