pub mod executor;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod runtime_config;
pub mod worker;
pub mod workers;

pub use executor::{CommandExecutor, ExecutionOutcome};
pub use metrics::{Metrics, MetricsRepo};
pub use model::{Job, JobFilter, JobSpec, JobState, NewJob};
pub use queue::Queue;
pub use repo::JobsRepo;
pub use retry::RetryDecision;
pub use runner::JobRunner;
pub use runtime_config::{ConfigRepo, RuntimeConfig};
pub use worker::{shutdown_signal, WorkerConfig, WorkerPool};
pub use workers::{WorkerRecord, WorkersRepo};
