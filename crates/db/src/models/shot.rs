//! Captured shot records (`dataset_shots`).

use serde::Serialize;
use shotforge_core::shots::ShotConfiguration;
use shotforge_core::types::{JobId, Timestamp};
use sqlx::FromRow;

use crate::error::StoreError;

#[derive(Debug, Clone, FromRow)]
pub struct ShotRow {
    pub id: i64,
    pub job_id: String,
    pub position: i64,
    pub filename: String,
    pub path: String,
    pub expression: String,
    pub lighting: String,
    pub camera_distance: String,
    pub angle: i64,
    pub width: i64,
    pub height: i64,
    pub created_at: Timestamp,
}

/// One captured image belonging to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shot {
    pub id: i64,
    pub job_id: JobId,
    /// Position in enumeration order.
    pub position: i64,
    pub filename: String,
    pub path: String,
    pub configuration: ShotConfiguration,
    pub width: u32,
    pub height: u32,
    pub created_at: Timestamp,
}

impl TryFrom<ShotRow> for Shot {
    type Error = StoreError;

    fn try_from(row: ShotRow) -> Result<Self, Self::Error> {
        let job_id = row
            .job_id
            .parse::<JobId>()
            .map_err(|e| StoreError::decode(&row.job_id, e))?;
        let dimension = |value: i64| {
            u32::try_from(value).map_err(|e| StoreError::decode(&row.job_id, e))
        };
        Ok(Self {
            id: row.id,
            job_id,
            position: row.position,
            width: dimension(row.width)?,
            height: dimension(row.height)?,
            configuration: ShotConfiguration {
                expression: row.expression,
                lighting: row.lighting,
                distance: row.camera_distance,
                angle: dimension(row.angle)?,
            },
            filename: row.filename,
            path: row.path,
            created_at: row.created_at,
        })
    }
}

/// DTO for recording a captured shot.
#[derive(Debug, Clone)]
pub struct NewShot {
    pub job_id: JobId,
    pub position: i64,
    pub filename: String,
    pub path: String,
    pub configuration: ShotConfiguration,
    pub width: u32,
    pub height: u32,
}
