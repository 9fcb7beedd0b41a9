use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::QueueError;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Claimed,
    Completed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Claimed,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Claimed => "claimed",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "claimed" => Ok(JobState::Claimed),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => {
                let known: Vec<&str> = JobState::ALL.iter().map(JobState::as_str).collect();
                Err(QueueError::InvalidSpec(format!(
                    "unknown job state '{other}' (expected one of: {})",
                    known.join(", ")
                )))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub priority: i64,
    pub run_at: DateTime<Utc>,
    pub attempts: i64,
    pub max_retries: i64,

    /// Worker holding the claim, empty when unclaimed.
    pub owner: String,
    pub claim_token: String,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Set at claim time; the attempt is killed once it passes.
    pub deadline_at: Option<DateTime<Utc>>,

    /// Per-attempt limit in seconds; `None` falls back to the `job_timeout` config key.
    pub timeout_secs: Option<i64>,

    /// Bumped on every update; the optimistic-concurrency predicate for claims.
    pub revision: i64,

    pub last_exit_code: Option<i64>,
    pub last_error: Option<String>,
    pub log_path: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_secs
            .and_then(|s| u64::try_from(s).ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Time left before the claim's deadline, zero once it has passed.
    /// `None` for jobs that are not claimed.
    pub fn time_left(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.deadline_at
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Raw `jobs` row; timestamps are unix milliseconds from the store clock.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub priority: i64,
    pub run_at: i64,
    pub attempts: i64,
    pub max_retries: i64,
    pub owner: String,
    pub claim_token: String,
    pub claimed_at: Option<i64>,
    pub deadline_at: Option<i64>,
    pub timeout_secs: Option<i64>,
    pub revision: i64,
    pub last_exit_code: Option<i64>,
    pub last_error: Option<String>,
    pub log_path: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            command: row.command,
            state: row.state,
            priority: row.priority,
            run_at: from_millis(row.run_at),
            attempts: row.attempts,
            max_retries: row.max_retries,
            owner: row.owner,
            claim_token: row.claim_token,
            claimed_at: row.claimed_at.map(from_millis),
            deadline_at: row.deadline_at.map(from_millis),
            timeout_secs: row.timeout_secs,
            revision: row.revision,
            last_exit_code: row.last_exit_code,
            last_error: row.last_error,
            log_path: row.log_path,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Caller-facing enqueue request.
///
/// Deserialization is strict: `id` and `command` are required and any field
/// not listed here is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<i64>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            priority: 0,
            run_at: None,
            max_retries: None,
            timeout: None,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn from_json(input: &str) -> Result<Self, QueueError> {
        let spec: JobSpec =
            serde_json::from_str(input).map_err(|e| QueueError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, QueueError> {
        let spec: JobSpec =
            serde_json::from_value(value).map_err(|e| QueueError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        validate_id(&self.id)?;

        if self.command.trim().is_empty() {
            return Err(QueueError::InvalidSpec("command must not be empty".into()));
        }
        if let Some(n) = self.max_retries {
            if n < 0 {
                return Err(QueueError::InvalidSpec("max_retries must be >= 0".into()));
            }
        }
        if self.timeout == Some(0) {
            return Err(QueueError::InvalidSpec("timeout must be > 0".into()));
        }
        if let Some(t) = self.timeout {
            if t > MAX_TIMEOUT_SECS {
                return Err(QueueError::InvalidSpec(format!(
                    "timeout must be at most {MAX_TIMEOUT_SECS} seconds"
                )));
            }
        }

        Ok(())
    }
}

/// Ids double as log file names, so only a filesystem-safe alphabet is allowed.
pub fn validate_id(id: &str) -> Result<(), QueueError> {
    if id.is_empty() {
        return Err(QueueError::InvalidSpec("id must not be empty".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(QueueError::InvalidSpec(format!(
            "id must be at most {MAX_ID_LEN} characters"
        )));
    }
    if id == "." || id == ".." {
        return Err(QueueError::InvalidSpec(format!("id '{id}' is reserved")));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(QueueError::InvalidSpec(format!(
            "id contains invalid character {c:?}"
        )));
    }
    Ok(())
}

/// Fully resolved insert, defaults already applied.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub priority: i64,
    /// `None` schedules at the store's current time.
    pub run_at: Option<DateTime<Utc>>,
    pub max_retries: i64,
    pub timeout_secs: Option<i64>,
    pub log_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<i64>,
}

impl JobFilter {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            limit: None,
        }
    }
}
