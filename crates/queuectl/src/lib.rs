//! Durable shell-command job queue backed by SQLite.
//!
//! Workers in one or more processes share a single store file and coordinate
//! only through conditional updates on the `jobs` table.

/// Store clock in unix milliseconds, evaluated inside the statement that uses it.
///
/// SQLite keeps `'now'` stable for the duration of one statement, so every
/// occurrence inside a single query sees the same instant.
macro_rules! now_ms {
    () => {
        "CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER)"
    };
}

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{QueueError, Result};
pub use jobs::{Job, JobSpec, JobState, Queue};
