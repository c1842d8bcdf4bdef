//! Repository for the `dataset_shots` table.

use chrono::Utc;
use shotforge_core::types::JobId;

use crate::error::StoreError;
use crate::models::shot::{NewShot, Shot, ShotRow};
use crate::DbPool;

const COLUMNS: &str = "\
    id, job_id, position, filename, path, expression, lighting, camera_distance, \
    angle, width, height, created_at";

pub struct ShotRepo;

impl ShotRepo {
    /// Record a captured shot.
    pub async fn append(pool: &DbPool, input: &NewShot) -> Result<Shot, StoreError> {
        let query = format!(
            "INSERT INTO dataset_shots \
                 (job_id, position, filename, path, expression, lighting, camera_distance, \
                  angle, width, height, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ShotRow>(&query)
            .bind(input.job_id.to_string())
            .bind(input.position)
            .bind(&input.filename)
            .bind(&input.path)
            .bind(&input.configuration.expression)
            .bind(&input.configuration.lighting)
            .bind(&input.configuration.distance)
            .bind(i64::from(input.configuration.angle))
            .bind(i64::from(input.width))
            .bind(i64::from(input.height))
            .bind(Utc::now())
            .fetch_one(pool)
            .await?;
        Shot::try_from(row)
    }

    /// Every shot for a job, in capture order.
    pub async fn list_for_job(pool: &DbPool, job_id: JobId) -> Result<Vec<Shot>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM dataset_shots WHERE job_id = ? ORDER BY position ASC, id ASC"
        );
        sqlx::query_as::<_, ShotRow>(&query)
            .bind(job_id.to_string())
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Shot::try_from)
            .collect()
    }
}
