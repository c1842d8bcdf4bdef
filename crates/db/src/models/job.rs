//! Job entity models and DTOs.

use serde::Serialize;
use shotforge_core::job::JobKind;
use shotforge_core::types::{JobId, Timestamp};
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};
use crate::error::StoreError;

/// A row from the `jobs` table, as SQLite stores it.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub status_id: StatusId,
    pub asset_path: String,
    pub parameters: String,
    pub progress: i64,
    pub message: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub total_shots: Option<i64>,
    pub completed_shots: i64,
    pub use_minimal: bool,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// A persisted job with typed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub asset_path: String,
    /// The merged parameter document the job runs with.
    pub parameters: serde_json::Value,
    pub progress: u8,
    pub message: Option<String>,
    pub result_path: Option<String>,
    /// One-line failure summary, shown to ordinary callers.
    pub error_message: Option<String>,
    /// Verbatim diagnostic trace, only exposed through diagnostics.
    pub error_trace: Option<String>,
    pub total_shots: Option<i64>,
    pub completed_shots: i64,
    pub use_minimal: bool,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .parse::<JobId>()
            .map_err(|e| StoreError::decode(&row.id, e))?;
        let kind = row
            .kind
            .parse::<JobKind>()
            .map_err(|e| StoreError::decode(&row.id, e))?;
        let status = JobStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::decode(&row.id, format!("unknown status id {}", row.status_id))
        })?;
        let parameters = serde_json::from_str(&row.parameters)
            .map_err(|e| StoreError::decode(&row.id, e))?;
        let progress = u8::try_from(row.progress.clamp(0, 100)).unwrap_or(100);

        Ok(Self {
            id,
            kind,
            status,
            asset_path: row.asset_path,
            parameters,
            progress,
            message: row.message,
            result_path: row.result_path,
            error_message: row.error_message,
            error_trace: row.error_trace,
            total_shots: row.total_shots,
            completed_shots: row.completed_shots,
            use_minimal: row.use_minimal,
            submitted_at: row.submitted_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// DTO for inserting a freshly submitted job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub kind: JobKind,
    pub asset_path: String,
    pub parameters: serde_json::Value,
    pub total_shots: Option<i64>,
    pub use_minimal: bool,
    pub message: Option<String>,
}

/// How a run ended, as recorded on the job row.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        result_path: String,
        message: String,
    },
    Failed {
        summary: String,
        trace: Option<String>,
    },
    Cancelled {
        message: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Error,
            Self::Cancelled { .. } => JobStatus::Cancelled,
        }
    }
}

/// Dataset counters surfaced alongside dataset jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_shots: Option<i64>,
    pub completed_shots: i64,
    pub use_minimal: bool,
}

/// The status payload returned to ordinary callers. Never carries the
/// diagnostic trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub asset: String,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetStats>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let dataset = (job.kind == JobKind::Dataset).then(|| DatasetStats {
            total_shots: job.total_shots,
            completed_shots: job.completed_shots,
            use_minimal: job.use_minimal,
        });
        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            asset: job.asset_path.clone(),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error_message.clone(),
            result: job.result_path.clone(),
            dataset,
        }
    }
}

/// One page of a job listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobPage {
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
    pub jobs: Vec<JobView>,
}
