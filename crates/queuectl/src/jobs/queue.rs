use sqlx::SqlitePool;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

use crate::error::{QueueError, Result};
use crate::jobs::{
    executor::CommandExecutor,
    metrics::{Metrics, MetricsRepo},
    model::{Job, JobFilter, JobSpec, NewJob},
    repo::JobsRepo,
    runtime_config::ConfigRepo,
    worker::{Worker, WorkerConfig},
    workers::{WorkerRecord, WorkersRepo},
};

/// Operator-facing surface over one store. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    jobs: JobsRepo,
    config: ConfigRepo,
    workers: WorkersRepo,
    metrics: MetricsRepo,
}

impl Queue {
    pub fn new(pool: SqlitePool, log_dir: impl Into<PathBuf>) -> Self {
        let jobs = JobsRepo::new(pool.clone(), log_dir);
        Self {
            config: ConfigRepo::new(pool.clone()),
            workers: WorkersRepo::new(pool),
            metrics: MetricsRepo::new(jobs.clone()),
            jobs,
        }
    }

    pub fn jobs(&self) -> &JobsRepo {
        &self.jobs
    }

    pub fn config(&self) -> &ConfigRepo {
        &self.config
    }

    pub fn workers(&self) -> &WorkersRepo {
        &self.workers
    }

    /// Validate `spec` and insert it as a pending job with zero attempts.
    ///
    /// A missing `max_retries` takes the configured default at enqueue time.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<String> {
        spec.validate()?;

        let max_retries = match spec.max_retries {
            Some(n) => n,
            None => self.config.snapshot().await?.max_retries,
        };
        let timeout_secs = spec.timeout.map(|t| t as i64);
        let log_path = self.jobs.log_path_for(&spec.id).to_string_lossy().into_owned();

        let id = self
            .jobs
            .enqueue(NewJob {
                id: spec.id,
                command: spec.command,
                priority: spec.priority,
                run_at: spec.run_at,
                max_retries,
                timeout_secs,
                log_path,
            })
            .await?;

        info!(job_id = %id, priority = spec.priority, max_retries, "job enqueued");
        Ok(id)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.jobs.list_jobs(filter).await
    }

    pub async fn get_status(&self, id: &str) -> Result<Job> {
        self.jobs
            .get_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("job {id}")))
    }

    pub async fn read_log(&self, id: &str) -> Result<Option<String>> {
        self.jobs.read_log(id).await
    }

    pub async fn dlq_list(&self) -> Result<Vec<Job>> {
        self.jobs.list_dead().await
    }

    /// Move a dead job back to pending with a fresh attempt budget.
    pub async fn dlq_retry(&self, id: &str) -> Result<Job> {
        let job = self.jobs.resurrect(id).await?;
        info!(job_id = %id, "dead job resurrected");
        Ok(job)
    }

    pub async fn config_get(&self, key: &str) -> Result<String> {
        self.config
            .get(key)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("config key {key}")))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.config.set(key, value).await?;
        info!(%key, %value, "config updated");
        Ok(())
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.config.list().await
    }

    pub async fn metrics(&self) -> Result<Metrics> {
        self.metrics.snapshot().await
    }

    /// Ask every running worker loop to exit after its current job.
    /// Returns how many workers were signalled.
    pub async fn stop_workers(&self) -> Result<u64> {
        let n = self.workers.request_stop_all().await?;
        info!(workers = n, "stop requested");
        Ok(n)
    }

    /// Running workers, each judged live by the heartbeat window it
    /// registered with.
    pub async fn active_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.workers.list_active().await
    }

    /// Claim the next eligible job for `worker_id`. The deadline is fixed
    /// from the job's own timeout or the configured `job_timeout` as read now.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let cfg = self.config.snapshot().await?;
        self.jobs.claim_next(worker_id, cfg.job_timeout).await
    }

    /// Run a single worker loop on the current task until stopped.
    pub async fn run_worker_loop(
        &self,
        cfg: WorkerConfig,
        executor: CommandExecutor,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        Worker::new(cfg, self.clone(), executor, shutdown_rx).run().await
    }
}
