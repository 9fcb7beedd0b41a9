use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, Result};
use crate::jobs::{
    executor::CommandExecutor, model::Job, queue::Queue, runner::JobRunner,
    runtime_config::RuntimeConfig,
};

/// Heartbeats older than this many intervals mark a worker as gone.
const HEARTBEAT_MISSES: u32 = 3;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub reap_interval: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(2),
            reap_interval: Duration::from_secs(5),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn heartbeat_stale_after(&self) -> Duration {
        self.heartbeat_interval * HEARTBEAT_MISSES
    }
}

/// One sequential select -> claim -> execute -> commit loop.
pub struct Worker {
    cfg: WorkerConfig,
    queue: Queue,
    runner: JobRunner,
    executor: CommandExecutor,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        cfg: WorkerConfig,
        queue: Queue,
        executor: CommandExecutor,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let runner = JobRunner::new(queue.jobs().clone(), queue.config().clone());
        Self {
            cfg,
            queue,
            runner,
            executor,
            shutdown_rx,
        }
    }

    /// Run until a stop is requested, either through the shutdown channel or
    /// the worker's stop flag in the store. A job already claimed is always
    /// run to completion and committed first.
    ///
    /// Store errors end the loop.
    pub async fn run(mut self) -> Result<()> {
        let worker_id = self.cfg.worker_id.clone();
        let workers = self.queue.workers().clone();

        workers
            .register(&worker_id, std::process::id(), self.cfg.heartbeat_stale_after())
            .await?;
        info!(
            worker_id = %worker_id,
            poll_interval_ms = self.cfg.poll_interval.as_millis() as u64,
            "worker started"
        );

        let heartbeat = spawn_heartbeat(
            workers.clone(),
            worker_id.clone(),
            self.cfg.heartbeat_interval,
        );

        let result = self.run_loop().await;

        heartbeat.abort();
        if let Err(err) = workers.mark_stopped(&worker_id).await {
            warn!(worker_id = %worker_id, error = %err, "failed to mark worker stopped");
        }

        match &result {
            Ok(()) => info!(worker_id = %worker_id, "worker exiting"),
            Err(err) => error!(worker_id = %worker_id, error = %err, "worker loop failed"),
        }
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        let worker_id = self.cfg.worker_id.clone();
        let mut last_reap: Option<Instant> = None;

        loop {
            let stopping = *self.shutdown_rx.borrow();
            if stopping {
                break;
            }
            if self.queue.workers().stop_requested(&worker_id).await? {
                info!(worker_id = %worker_id, "stop requested through store");
                break;
            }

            // reclaim jobs from dead workers on a fixed interval to avoid hot-loop write load
            if last_reap.map_or(true, |t| t.elapsed() >= self.cfg.reap_interval) {
                let reclaimed = self.runner.reclaim_stale().await?;
                last_reap = Some(Instant::now());
                if reclaimed > 0 {
                    info!(worker_id = %worker_id, reclaimed, "reclaimed stale claims");
                }
            }

            match self.queue.claim_next(&worker_id).await? {
                Some(job) => self.process(job).await?,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                        changed = self.shutdown_rx.changed() => {
                            if changed.is_err() {
                                // sender gone: nobody can ask us to stop any more, treat as stop
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn process(&self, job: Job) -> Result<()> {
        // the deadline was fixed at claim time; config changes since then do not move it
        let timeout = job
            .time_left(Utc::now())
            .unwrap_or_else(|| job.timeout_or(RuntimeConfig::default().job_timeout));

        info!(
            worker_id = %self.cfg.worker_id,
            job_id = %job.id,
            attempt = job.attempts + 1,
            max_retries = job.max_retries,
            timeout_ms = timeout.as_millis() as u64,
            command = %job.command,
            "running job"
        );

        let outcome = self
            .executor
            .run(&job.command, Path::new(&job.log_path), timeout)
            .await;

        match self.runner.commit_outcome(&job, &outcome).await {
            Ok(_) => Ok(()),
            Err(QueueError::ClaimLost(id)) => {
                warn!(job_id = %id, ?outcome, "claim was reclaimed before outcome commit");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn spawn_heartbeat(
    workers: crate::jobs::workers::WorkersRepo,
    worker_id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = workers.heartbeat(&worker_id).await {
                warn!(worker_id = %worker_id, error = %err, "heartbeat failed");
            } else {
                debug!(worker_id = %worker_id, "heartbeat");
            }
        }
    })
}

/// In-process registry of running worker loops sharing one shutdown signal.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
}

impl WorkerPool {
    pub fn start(queue: &Queue, executor: CommandExecutor, configs: Vec<WorkerConfig>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = configs
            .into_iter()
            .map(|cfg| {
                let id = cfg.worker_id.clone();
                let worker = Worker::new(cfg, queue.clone(), executor.clone(), shutdown_rx.clone());
                (id, tokio::spawn(worker.run()))
            })
            .collect();

        Self {
            shutdown_tx,
            handles,
        }
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.handles.iter().map(|(id, _)| id.clone()).collect()
    }

    /// True once every loop has exited on its own (store stop flag or error).
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|(_, h)| h.is_finished())
    }

    /// Ask all loops to stop after their current job.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for every loop to exit. Returns the first loop error, if any.
    pub async fn join(self) -> Result<()> {
        let mut first_err = None;
        for (id, handle) in self.handles {
            let res = match handle.await {
                Ok(res) => res,
                Err(join_err) => Err(QueueError::Io(std::io::Error::other(format!(
                    "worker {id} panicked: {join_err}"
                )))),
            };
            if let Err(err) = res {
                error!(worker_id = %id, error = %err, "worker ended with error");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }

    /// Run until `stop` resolves or any loop exits, then let the remaining
    /// loops finish their current job. A failing `stop` counts as a stop
    /// request, so running jobs are never dropped mid-attempt.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        tokio::select! {
            res = stop => {
                if let Err(err) = res {
                    error!(error = %err, "stop listener failed, shutting down");
                }
            }
            _ = self.wait_any_exit() => info!("a worker loop exited"),
        }

        info!("shutting down, waiting for in-flight jobs");
        self.shutdown().await
    }

    /// Resolves when any loop has exited.
    pub async fn wait_any_exit(&self) {
        loop {
            if self.handles.iter().any(|(_, h)| h.is_finished()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Ctrl+C received");
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
            }
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received");
        Ok(())
    }
}
