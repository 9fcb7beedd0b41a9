use queuectl::api;
use queuectl::config;
use queuectl::db;
use queuectl::jobs::{shutdown_signal, CommandExecutor, Queue, WorkerPool};
use queuectl::telemetry;

use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info");

    let cfg = config::Config::from_env()?;
    let api_addr = cfg.admin_addr.clone();

    info!(
        worker_id = %cfg.worker_id,
        workers = cfg.worker_count,
        poll_interval_ms = cfg.poll_interval.as_millis() as u64,
        heartbeat_interval_ms = cfg.heartbeat_interval.as_millis() as u64,
        reap_interval_ms = cfg.reap_interval.as_millis() as u64,
        log_dir = %cfg.log_dir.display(),
        api = %api_addr.clone().unwrap_or_else(|| "disabled".to_string()),
        migrate_on_startup = cfg.migrate_on_startup,
        "queuectl worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let queue = Queue::new(pool, cfg.log_dir.clone());

    // ---- API task ----
    let api_state = api::ApiState {
        queue: queue.clone(),
    };
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            api::serve(&addr, api_state).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Worker loops ----
    let configs = (0..cfg.worker_count)
        .map(|i| cfg.worker_config(i))
        .collect();
    let workers = WorkerPool::start(&queue, CommandExecutor::default(), configs);

    let stop = async move {
        tokio::select! {
            res = shutdown_signal() => res,
            res = api_handle => {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "admin api stopped"),
                    Err(e) => error!(error = %e, "admin api task panicked"),
                }
                Ok(())
            }
        }
    };

    workers.run_until(stop).await?;
    Ok(())
}
