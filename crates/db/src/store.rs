//! The narrow persistence contract the scheduler and workers use.

use std::future::Future;

use shotforge_core::types::JobId;

use crate::error::StoreError;
use crate::models::job::{Job, JobOutcome, JobPage, NewJob};
use crate::models::shot::{NewShot, Shot};
use crate::models::status::JobStatus;
use crate::repositories::{JobRepo, ShotRepo};
use crate::DbPool;

/// CRUD operations over jobs and their captured shots.
///
/// Every call is its own short transaction; implementations hold no locks
/// between calls.
pub trait JobStore: Send + Sync + 'static {
    fn insert(&self, job: &NewJob) -> impl Future<Output = Result<Job, StoreError>> + Send;

    fn find(&self, id: JobId) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Newest-first page with an optional status filter.
    fn list(
        &self,
        status: Option<JobStatus>,
        offset: i64,
        limit: i64,
    ) -> impl Future<Output = Result<JobPage, StoreError>> + Send;

    /// Oldest-first list of every job in `status`.
    fn list_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Queued → Processing. `false` if the job was not Queued.
    fn mark_processing(&self, id: JobId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Monotonic progress write. `false` if skipped.
    fn update_progress(
        &self,
        id: JobId,
        percent: u8,
        message: Option<&str>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Enter a terminal state. `false` if already terminal.
    fn finish(
        &self,
        id: JobId,
        outcome: &JobOutcome,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Queued → Cancelled. `false` if the job was not Queued.
    fn cancel_queued(
        &self,
        id: JobId,
        message: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Processing → Error for every job orphaned by a previous process.
    fn fail_interrupted(
        &self,
        reason: &str,
    ) -> impl Future<Output = Result<Vec<JobId>, StoreError>> + Send;

    fn append_shot(&self, shot: &NewShot) -> impl Future<Output = Result<Shot, StoreError>> + Send;

    fn list_shots(&self, job_id: JobId) -> impl Future<Output = Result<Vec<Shot>, StoreError>> + Send;
}

/// [`JobStore`] backed by the SQLite repositories.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = crate::create_pool(database_url).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        JobRepo::insert(&self.pool, job).await
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, id).await
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<JobPage, StoreError> {
        JobRepo::list(&self.pool, status, offset, limit).await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        JobRepo::list_by_status(&self.pool, status).await
    }

    async fn mark_processing(&self, id: JobId) -> Result<bool, StoreError> {
        JobRepo::mark_processing(&self.pool, id).await
    }

    async fn update_progress(
        &self,
        id: JobId,
        percent: u8,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        JobRepo::update_progress(&self.pool, id, percent, message).await
    }

    async fn finish(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        JobRepo::finish(&self.pool, id, outcome).await
    }

    async fn cancel_queued(&self, id: JobId, message: &str) -> Result<bool, StoreError> {
        JobRepo::cancel_queued(&self.pool, id, message).await
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<Vec<JobId>, StoreError> {
        JobRepo::fail_interrupted(&self.pool, reason).await
    }

    async fn append_shot(&self, shot: &NewShot) -> Result<Shot, StoreError> {
        ShotRepo::append(&self.pool, shot).await
    }

    async fn list_shots(&self, job_id: JobId) -> Result<Vec<Shot>, StoreError> {
        ShotRepo::list_for_job(&self.pool, job_id).await
    }
}
