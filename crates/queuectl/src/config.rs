use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::worker::WorkerConfig;

// Process-level settings for binaries, loaded from the environment.
// Queue behaviour that operators tune at runtime (backoff, timeouts, retry caps)
// lives in the store's config table instead, see `jobs::runtime_config`.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub reap_interval: Duration,
    pub log_dir: PathBuf,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let home = app_dir();

        let database_url = env_or_fallback("QUEUECTL_DATABASE_URL", "DATABASE_URL")
            .unwrap_or_else(|| format!("sqlite://{}", home.join("queue.db").display()));

        let worker_id = env_or_fallback("QUEUECTL_WORKER_ID", "WORKER_ID").unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "worker".to_string());
            format!("{host}-{}", std::process::id())
        });

        let worker_count = env_or_fallback("QUEUECTL_WORKER_COUNT", "WORKER_COUNT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, 64);

        let poll_interval_ms = env_or_fallback("QUEUECTL_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(500)
            .max(10);

        let heartbeat_interval_ms =
            env_or_fallback("QUEUECTL_HEARTBEAT_INTERVAL_MS", "HEARTBEAT_INTERVAL_MS")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(2_000)
                .max(100);

        let reap_interval_ms = env_or_fallback("QUEUECTL_REAP_INTERVAL_MS", "REAP_INTERVAL_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(5_000)
            .max(100);

        let log_dir = env_or_fallback("QUEUECTL_LOG_DIR", "LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("logs"));

        let admin_addr = env_or_fallback("QUEUECTL_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("QUEUECTL_MIGRATE_ON_STARTUP").unwrap_or(true);

        Ok(Self {
            database_url,
            worker_id,
            worker_count,
            poll_interval: Duration::from_millis(poll_interval_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            reap_interval: Duration::from_millis(reap_interval_ms),
            log_dir,
            admin_addr,
            migrate_on_startup,
        })
    }

    /// Settings for the `index`-th worker loop in this process.
    /// A single loop keeps the bare worker id.
    pub fn worker_config(&self, index: usize) -> WorkerConfig {
        let worker_id = if self.worker_count > 1 {
            format!("{}-{}", self.worker_id, index + 1)
        } else {
            self.worker_id.clone()
        };

        WorkerConfig {
            worker_id,
            poll_interval: self.poll_interval,
            heartbeat_interval: self.heartbeat_interval,
            reap_interval: self.reap_interval,
        }
    }
}

fn app_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".queuectl")
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_admin_addr_values_are_ignored() {
        assert_eq!(normalize_optional_addr("  "), None);
        assert_eq!(normalize_optional_addr("off"), None);
        assert_eq!(normalize_optional_addr("NONE"), None);
        assert_eq!(
            normalize_optional_addr(" 127.0.0.1:8080 "),
            Some("127.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn worker_ids_are_suffixed_only_for_multiple_loops() {
        let mut cfg = Config {
            database_url: "sqlite::memory:".into(),
            worker_id: "host-1".into(),
            worker_count: 1,
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(1000),
            reap_interval: Duration::from_millis(1000),
            log_dir: PathBuf::from("/tmp"),
            admin_addr: None,
            migrate_on_startup: true,
        };
        assert_eq!(cfg.worker_config(0).worker_id, "host-1");

        cfg.worker_count = 3;
        assert_eq!(cfg.worker_config(0).worker_id, "host-1-1");
        assert_eq!(cfg.worker_config(2).worker_id, "host-1-3");
    }
}
