use shotforge_core::types::JobId;

/// Failures from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected or could not run a query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt row for job {job_id}: {reason}")]
    Decode { job_id: String, reason: String },

    /// A row that must exist was missing.
    #[error("Job {0} not found")]
    NotFound(JobId),
}

impl StoreError {
    pub(crate) fn decode(job_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            job_id: job_id.to_string(),
            reason: reason.to_string(),
        }
    }
}
