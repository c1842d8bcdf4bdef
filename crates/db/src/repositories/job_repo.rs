//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for every status literal. Each
//! transition is a single guarded `UPDATE`, so the row only ever moves
//! forward through its lifecycle regardless of caller ordering.

use chrono::Utc;
use shotforge_core::types::JobId;

use crate::error::StoreError;
use crate::models::job::{Job, JobOutcome, JobPage, JobRow, JobView, NewJob};
use crate::models::status::JobStatus;
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, status_id, asset_path, parameters, progress, message, \
    result_path, error_message, error_trace, total_shots, \
    (SELECT COUNT(*) FROM dataset_shots s WHERE s.job_id = jobs.id) AS completed_shots, \
    use_minimal, submitted_at, started_at, completed_at, updated_at";

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new Queued job and return it.
    pub async fn insert(pool: &DbPool, input: &NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let parameters = input.parameters.to_string();
        sqlx::query(
            "INSERT INTO jobs \
                 (id, kind, status_id, asset_path, parameters, progress, message, \
                  total_shots, use_minimal, submitted_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(input.id.to_string())
        .bind(input.kind.as_str())
        .bind(JobStatus::Queued.id())
        .bind(&input.asset_path)
        .bind(parameters)
        .bind(&input.message)
        .bind(input.total_shots)
        .bind(input.use_minimal)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, input.id)
            .await?
            .ok_or(StoreError::NotFound(input.id))
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &DbPool, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// List jobs newest first with an optional status filter.
    ///
    /// `limit` defaults to [`DEFAULT_LIMIT`] when non-positive and is
    /// capped at [`MAX_LIMIT`].
    pub async fn list(
        pool: &DbPool,
        status: Option<JobStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<JobPage, StoreError> {
        let limit = if limit <= 0 { DEFAULT_LIMIT } else { limit.min(MAX_LIMIT) };
        let offset = offset.max(0);

        let where_clause = if status.is_some() { "WHERE status_id = ?" } else { "" };

        let count_query = format!("SELECT COUNT(*) FROM jobs {where_clause}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(s) = status {
            count = count.bind(s.id());
        }
        let total = count.fetch_one(pool).await?;

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY submitted_at DESC, rowid DESC \
             LIMIT ? OFFSET ?"
        );
        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(s) = status {
            q = q.bind(s.id());
        }
        let rows = q.bind(limit).bind(offset).fetch_all(pool).await?;

        let jobs = rows
            .into_iter()
            .map(|row| Job::try_from(row).map(|job| JobView::from(&job)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobPage {
            total,
            offset,
            limit,
            jobs,
        })
    }

    /// All jobs in `status`, oldest first. Used for restart recovery and
    /// queue sweeps.
    pub async fn list_by_status(pool: &DbPool, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = ? \
             ORDER BY submitted_at ASC, rowid ASC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    /// Move a Queued job to Processing and stamp `started_at` once.
    ///
    /// Returns `false` when the job was not Queued, which is how a worker
    /// learns it lost a race with a cancel.
    pub async fn mark_processing(pool: &DbPool, id: JobId) -> Result<bool, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, started_at = COALESCE(started_at, ?), updated_at = ? \
             WHERE id = ? AND status_id = ?",
        )
        .bind(JobStatus::Processing.id())
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .bind(JobStatus::Queued.id())
        .execute(pool)
        .await?;
        let moved = result.rows_affected() > 0;
        if !moved {
            tracing::debug!(job_id = %id, "Job not queued, left as is");
        }
        Ok(moved)
    }

    /// Record progress for a Processing job.
    ///
    /// The write is skipped when it would lower the stored percentage, so
    /// readers never observe progress going backwards.
    pub async fn update_progress(
        pool: &DbPool,
        id: JobId,
        percent: u8,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let percent = i64::from(percent.min(100));
        let result = sqlx::query(
            "UPDATE jobs \
             SET progress = ?, message = COALESCE(?, message), updated_at = ? \
             WHERE id = ? AND status_id = ? AND progress <= ?",
        )
        .bind(percent)
        .bind(message)
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(JobStatus::Processing.id())
        .bind(percent)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a non-terminal job into its terminal state.
    ///
    /// Guarded on a non-terminal status, so `completed_at` is set exactly
    /// once. Returns `false` if the job was already terminal.
    pub async fn finish(pool: &DbPool, id: JobId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        let now = Utc::now();
        let (progress, message, result_path, error_message, error_trace) = match outcome {
            JobOutcome::Completed {
                result_path,
                message,
            } => (Some(100_i64), Some(message.as_str()), Some(result_path.as_str()), None, None),
            JobOutcome::Failed { summary, trace } => (
                None,
                Some(summary.as_str()),
                None,
                Some(summary.as_str()),
                trace.as_deref(),
            ),
            JobOutcome::Cancelled { message } => (None, Some(message.as_str()), None, None, None),
        };

        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, \
                 progress = COALESCE(?, progress), \
                 message = ?, \
                 result_path = ?, \
                 error_message = ?, \
                 error_trace = ?, \
                 completed_at = ?, \
                 updated_at = ? \
             WHERE id = ? AND status_id NOT IN (?, ?, ?)",
        )
        .bind(outcome.status().id())
        .bind(progress)
        .bind(message)
        .bind(result_path)
        .bind(error_message)
        .bind(error_trace)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .bind(JobStatus::TERMINAL[0].id())
        .bind(JobStatus::TERMINAL[1].id())
        .bind(JobStatus::TERMINAL[2].id())
        .execute(pool)
        .await?;
        let moved = result.rows_affected() > 0;
        if !moved {
            tracing::debug!(
                job_id = %id,
                status = %outcome.status(),
                "Job already terminal, outcome dropped",
            );
        }
        Ok(moved)
    }

    /// Cancel a job that has not started yet.
    ///
    /// Returns `false` if the job was not Queued.
    pub async fn cancel_queued(pool: &DbPool, id: JobId, message: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, message = ?, completed_at = ?, updated_at = ? \
             WHERE id = ? AND status_id = ?",
        )
        .bind(JobStatus::Cancelled.id())
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .bind(JobStatus::Queued.id())
        .execute(pool)
        .await?;
        let moved = result.rows_affected() > 0;
        if !moved {
            tracing::debug!(job_id = %id, "Job no longer queued, not cancelled here");
        }
        Ok(moved)
    }

    /// Fail every job left Processing by a previous process.
    ///
    /// Returns the ids that were moved.
    pub async fn fail_interrupted(pool: &DbPool, reason: &str) -> Result<Vec<JobId>, StoreError> {
        let now = Utc::now();
        let ids: Vec<String> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = ?, message = ?, error_message = ?, completed_at = ?, updated_at = ? \
             WHERE status_id = ? \
             RETURNING id",
        )
        .bind(JobStatus::Error.id())
        .bind(reason)
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(JobStatus::Processing.id())
        .fetch_all(pool)
        .await?;

        ids.iter()
            .map(|id| id.parse::<JobId>().map_err(|e| StoreError::decode(id, e)))
            .collect()
    }
}
