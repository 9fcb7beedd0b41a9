use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;

use crate::error::{QueueError, Result};

pub const BACKOFF_BASE: &str = "backoff_base";
pub const JOB_TIMEOUT: &str = "job_timeout";
pub const MAX_RETRIES: &str = "max_retries";
pub const RECLAIM_GRACE: &str = "reclaim_grace";

pub const KNOWN_KEYS: [&str; 4] = [BACKOFF_BASE, JOB_TIMEOUT, MAX_RETRIES, RECLAIM_GRACE];

/// Typed view of the `config` table at one point in time.
///
/// Taken fresh at every decision point; never held across jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub backoff_base: u32,
    pub job_timeout: Duration,
    pub max_retries: i64,
    pub reclaim_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backoff_base: 2,
            job_timeout: Duration::from_secs(300),
            max_retries: 3,
            reclaim_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct ConfigRepo {
    pool: SqlitePool,
}

impl ConfigRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let value = validate(key, value)?;

        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM config ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn snapshot(&self) -> Result<RuntimeConfig> {
        let mut cfg = RuntimeConfig::default();

        for (key, value) in self.list().await? {
            // values written outside `set` may be malformed; keep the default then
            let parsed = validate(&key, &value);
            let Ok(value) = parsed else {
                warn!(%key, %value, "ignoring malformed config value");
                continue;
            };
            match key.as_str() {
                BACKOFF_BASE => cfg.backoff_base = value.parse().unwrap_or(cfg.backoff_base),
                JOB_TIMEOUT => {
                    if let Ok(secs) = value.parse() {
                        cfg.job_timeout = Duration::from_secs(secs);
                    }
                }
                MAX_RETRIES => cfg.max_retries = value.parse().unwrap_or(cfg.max_retries),
                RECLAIM_GRACE => {
                    if let Ok(secs) = value.parse() {
                        cfg.reclaim_grace = Duration::from_secs(secs);
                    }
                }
                _ => {}
            }
        }

        Ok(cfg)
    }
}

/// Check a value for a known key and return its normalized form.
pub fn validate(key: &str, value: &str) -> Result<String> {
    let v = value.trim();
    let invalid = |what: &str| QueueError::InvalidConfig(format!("{key} {what}, got '{value}'"));

    match key {
        BACKOFF_BASE => match v.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n.to_string()),
            _ => Err(invalid("must be an integer >= 1")),
        },
        JOB_TIMEOUT => match v.parse::<u64>() {
            Ok(n) if n >= 1 && n <= crate::jobs::model::MAX_TIMEOUT_SECS => Ok(n.to_string()),
            _ => Err(invalid("must be a number of seconds >= 1")),
        },
        MAX_RETRIES => match v.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(n.to_string()),
            _ => Err(invalid("must be an integer >= 0")),
        },
        RECLAIM_GRACE => match v.parse::<u64>() {
            Ok(n) if n <= crate::jobs::model::MAX_TIMEOUT_SECS => Ok(n.to_string()),
            _ => Err(invalid("must be a number of seconds >= 0")),
        },
        other => Err(QueueError::InvalidConfig(format!(
            "unknown key '{other}' (known: {})",
            KNOWN_KEYS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_are_validated() {
        assert_eq!(validate(BACKOFF_BASE, " 3 ").unwrap(), "3");
        assert!(validate(BACKOFF_BASE, "0").is_err());
        assert!(validate(BACKOFF_BASE, "two").is_err());
        assert!(validate(JOB_TIMEOUT, "0").is_err());
        assert_eq!(validate(MAX_RETRIES, "0").unwrap(), "0");
        assert!(validate(MAX_RETRIES, "-1").is_err());
        assert_eq!(validate(RECLAIM_GRACE, "0").unwrap(), "0");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = validate("colour", "blue").unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(_)));
    }
}
