use thiserror::Error;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("job {0} already exists")]
    DuplicateId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The conditional update guarding a claimed job matched no row: the claim
    /// was reclaimed or otherwise released while this worker held it.
    #[error("claim on job {0} is no longer held")]
    ClaimLost(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Errors caused by the caller's input rather than the store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueueError::InvalidSpec(_)
                | QueueError::DuplicateId(_)
                | QueueError::NotFound(_)
                | QueueError::InvalidConfig(_)
        )
    }
}
