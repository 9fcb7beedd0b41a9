use queuectl::config::Config;
use queuectl::db;
use queuectl::jobs::{
    shutdown_signal, CommandExecutor, Job, JobFilter, JobSpec, JobState, Queue, WorkerPool,
};
use queuectl::telemetry;
use queuectl::QueueError;
use std::env;

const USAGE: &str = "queuectl <command>\n\
Commands:\n\
- enqueue <json>           e.g. '{\"id\":\"job1\",\"command\":\"sleep 2\"}'\n\
- list [state]             state: pending | claimed | completed | dead\n\
- get <id>\n\
- logs <id>\n\
- status\n\
- metrics\n\
- dlq list\n\
- dlq retry <id>\n\
- config list\n\
- config get <key>\n\
- config set <key> <value>\n\
- worker run [count]\n\
- worker stop\n\
\n\
Uses QUEUECTL_DATABASE_URL (default sqlite://$HOME/.queuectl/queue.db).\n";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help" | "help") {
        eprint!("{USAGE}");
        std::process::exit(2);
    }

    let worker_mode = args.first().map(String::as_str) == Some("worker")
        && args.get(1).map(String::as_str) == Some("run");
    telemetry::init_tracing(if worker_mode { "info" } else { "warn" });

    if let Err(err) = run(&args).await {
        eprintln!("error: {err:#}");
        let code = match err.downcast_ref::<QueueError>() {
            Some(e) if e.is_validation() => 1,
            Some(_) => 3,
            None => 2,
        };
        std::process::exit(code);
    }
}

async fn run(args: &[String]) -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }
    let queue = Queue::new(pool, cfg.log_dir.clone());

    match args[0].as_str() {
        "enqueue" => {
            let spec = JobSpec::from_json(arg(args, 1, "job json")?)?;
            let id = queue.enqueue(spec).await?;
            println!("enqueued {id}");
        }
        "list" => {
            let filter = match args.get(1) {
                Some(s) => JobFilter::state(s.parse::<JobState>()?),
                None => JobFilter::default(),
            };
            print_jobs(&queue.list_jobs(&filter).await?);
        }
        "get" => {
            let job = queue.get_status(arg(args, 1, "job id")?).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        "logs" => {
            let id = arg(args, 1, "job id")?;
            match queue.read_log(id).await? {
                Some(text) => print!("{text}"),
                None => eprintln!("no output recorded for {id} yet"),
            }
        }
        "status" => print_status(&queue).await?,
        "metrics" => {
            let m = queue.metrics().await?;
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
        "dlq" => match arg(args, 1, "dlq subcommand")? {
            "list" => print_jobs(&queue.dlq_list().await?),
            "retry" => {
                let job = queue.dlq_retry(arg(args, 2, "job id")?).await?;
                println!("{} moved back to pending", job.id);
            }
            other => anyhow::bail!("unknown dlq subcommand: {other}\n\n{USAGE}"),
        },
        "config" => match arg(args, 1, "config subcommand")? {
            "list" => {
                for (key, value) in queue.config_list().await? {
                    println!("{key}={value}");
                }
            }
            "get" => println!("{}", queue.config_get(arg(args, 2, "config key")?).await?),
            "set" => {
                let key = arg(args, 2, "config key")?;
                queue.config_set(key, arg(args, 3, "config value")?).await?;
                println!("{key}={}", queue.config_get(key).await?);
            }
            other => anyhow::bail!("unknown config subcommand: {other}\n\n{USAGE}"),
        },
        "worker" => match arg(args, 1, "worker subcommand")? {
            "run" => {
                let mut cfg = cfg;
                if let Some(n) = args.get(2) {
                    cfg.worker_count = n
                        .parse::<usize>()
                        .map_err(|_| anyhow::anyhow!("worker count must be a positive integer"))?
                        .clamp(1, 64);
                }
                run_workers(&cfg, &queue).await?;
            }
            "stop" => {
                let n = queue.stop_workers().await?;
                println!("stop requested for {n} worker(s)");
            }
            other => anyhow::bail!("unknown worker subcommand: {other}\n\n{USAGE}"),
        },
        other => anyhow::bail!("unknown command: {other}\n\n{USAGE}"),
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], i: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing {what}\n\n{USAGE}"))
}

async fn run_workers(cfg: &Config, queue: &Queue) -> anyhow::Result<()> {
    let configs = (0..cfg.worker_count)
        .map(|i| cfg.worker_config(i))
        .collect();
    let pool = WorkerPool::start(queue, CommandExecutor::default(), configs);
    tracing::info!(workers = ?pool.worker_ids(), "workers running, Ctrl+C to stop");

    pool.run_until(shutdown_signal()).await?;
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("(no jobs)");
        return;
    }
    println!(
        "{:<24} {:<10} {:>8} {:>9}  {:<25} COMMAND",
        "ID", "STATE", "PRIORITY", "ATTEMPTS", "RUN_AT"
    );
    for job in jobs {
        println!(
            "{:<24} {:<10} {:>8} {:>9}  {:<25} {}",
            job.id,
            job.state,
            job.priority,
            format!("{}/{}", job.attempts, job.max_retries + 1),
            job.run_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            job.command
        );
    }
}

async fn print_status(queue: &Queue) -> anyhow::Result<()> {
    let m = queue.metrics().await?;
    println!(
        "jobs: total={} pending={} claimed={} completed={} dead={}",
        m.total, m.pending, m.claimed, m.completed, m.dead
    );

    let workers = queue.active_workers().await?;
    println!("active workers: {}", workers.len());
    for w in workers {
        println!(
            "  {} pid={} since={}{}",
            w.id,
            w.pid,
            w.started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            if w.stop_requested { " (stopping)" } else { "" }
        );
    }
    Ok(())
}
