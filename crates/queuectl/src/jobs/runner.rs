use tracing::{info, warn};

use crate::error::{QueueError, Result};
use crate::jobs::{
    executor::ExecutionOutcome,
    model::Job,
    repo::JobsRepo,
    retry::{decide, RetryDecision},
    runtime_config::ConfigRepo,
};

/// Commits attempt outcomes and routes failures through the retry policy.
#[derive(Clone)]
pub struct JobRunner {
    jobs: JobsRepo,
    config: ConfigRepo,
}

impl JobRunner {
    pub fn new(jobs: JobsRepo, config: ConfigRepo) -> Self {
        Self { jobs, config }
    }

    pub async fn commit_outcome(&self, job: &Job, outcome: &ExecutionOutcome) -> Result<Job> {
        if outcome.is_success() {
            return self.on_success(job).await;
        }
        let error = outcome
            .error_message()
            .unwrap_or_else(|| "failed".to_string());
        self.on_failure(job, outcome.exit_code(), &error).await
    }

    pub async fn on_success(&self, job: &Job) -> Result<Job> {
        let done = self.jobs.mark_completed(job, Some(0)).await?;
        info!(job_id = %job.id, attempts = done.attempts, "job completed");
        Ok(done)
    }

    /// Record a failed attempt: back to pending with backoff while retries
    /// remain, otherwise dead.
    pub async fn on_failure(&self, job: &Job, exit_code: Option<i64>, error: &str) -> Result<Job> {
        // read fresh so operator changes apply to the very next decision
        let cfg = self.config.snapshot().await?;

        let attempts = job.attempts + 1;
        let decision = decide(attempts, job.max_retries, cfg.backoff_base);

        let updated = self.jobs.mark_failed(job, decision, exit_code, error).await?;

        match decision {
            RetryDecision::Retry { delay } => info!(
                job_id = %job.id,
                attempts,
                max_retries = job.max_retries,
                delay_secs = delay.as_secs(),
                error,
                "job failed, retry scheduled"
            ),
            RetryDecision::Dead => warn!(
                job_id = %job.id,
                attempts,
                max_retries = job.max_retries,
                error,
                "job moved to dead-letter queue"
            ),
        }

        Ok(updated)
    }

    /// Treat abandoned claims as failed attempts.
    ///
    /// Returns how many jobs were released. A claim that its owner finishes
    /// while the sweep runs is left alone.
    pub async fn reclaim_stale(&self) -> Result<u64> {
        let cfg = self.config.snapshot().await?;
        let stale = self.jobs.find_stale_claims(cfg.reclaim_grace).await?;

        let mut released = 0;
        for job in stale {
            let error = format!("claim abandoned by worker {}", job.owner);
            match self.on_failure(&job, None, &error).await {
                Ok(updated) => {
                    released += 1;
                    warn!(
                        job_id = %job.id,
                        owner = %job.owner,
                        state = %updated.state,
                        "reclaimed stale claim"
                    );
                }
                Err(QueueError::ClaimLost(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(released)
    }
}
