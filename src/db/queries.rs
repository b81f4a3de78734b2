use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{StoreError, VideoStore};
use crate::models::job::{GpsCoord, JobMessage};
use crate::models::video::{
    ClassCounts, CountResult, Severity, VehicleTotals, VideoRecord, VideoStatus,
};

const RECORD_COLUMNS: &str = r#"
    video_id, status, source, filename, gps_coords, frames, vehicle_totals,
    class_counts, severity, result_key, error, created_at, updated_at
"#;

fn decode_column<T>(column: &str, raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|e: T::Err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn record_from_row(row: &PgRow) -> Result<VideoRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let severity: Option<String> = row.try_get("severity")?;
    let gps_coords: Json<Vec<GpsCoord>> = row.try_get("gps_coords")?;
    let vehicle_totals: Option<Json<VehicleTotals>> = row.try_get("vehicle_totals")?;
    let class_counts: Option<Json<ClassCounts>> = row.try_get("class_counts")?;

    Ok(VideoRecord {
        video_id: row.try_get("video_id")?,
        status: decode_column::<VideoStatus>("status", &status)?,
        source: row.try_get("source")?,
        filename: row.try_get("filename")?,
        gps_coords: gps_coords.0,
        frames: row.try_get("frames")?,
        vehicle_totals: vehicle_totals.map(|t| t.0),
        class_counts: class_counts.map(|c| c.0),
        severity: severity
            .map(|s| decode_column::<Severity>("severity", &s))
            .transpose()?,
        result_key: row.try_get("result_key")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a freshly uploaded video record
pub async fn create_record(
    pool: &PgPool,
    video_id: Uuid,
    filename: Option<&str>,
    source: &str,
    gps_coords: &[GpsCoord],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO video_records (video_id, status, filename, source, gps_coords)
        VALUES ($1, 'UPLOADED', $2, $3, $4)
        "#,
    )
    .bind(video_id)
    .bind(filename)
    .bind(source)
    .bind(Json(gps_coords))
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a record by video ID
pub async fn get_record(pool: &PgPool, video_id: Uuid) -> Result<Option<VideoRecord>, sqlx::Error> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM video_records WHERE video_id = $1");
    let row = sqlx::query(&query)
        .bind(video_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Most recent records first
pub async fn list_records(pool: &PgPool, limit: i64) -> Result<Vec<VideoRecord>, sqlx::Error> {
    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM video_records ORDER BY created_at DESC LIMIT $1"
    );
    let rows = sqlx::query(&query).bind(limit).fetch_all(pool).await?;

    rows.iter().map(record_from_row).collect()
}

/// Claim a record for processing, creating it when the upload side never did.
/// Matches nothing once the record is terminal.
pub async fn mark_processing(pool: &PgPool, job: &JobMessage) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO video_records (video_id, status, gps_coords)
        VALUES ($1, 'PROCESSING', $2)
        ON CONFLICT (video_id) DO UPDATE
        SET status = 'PROCESSING',
            error = NULL,
            updated_at = NOW()
        WHERE video_records.status NOT IN ('DONE', 'PROCESSED', 'FAILED')
        "#,
    )
    .bind(job.video_id)
    .bind(Json(&job.gps_coords))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Terminal success write
pub async fn complete_record(pool: &PgPool, result: &CountResult) -> Result<bool, sqlx::Error> {
    let frames = i64::try_from(result.frames).unwrap_or(i64::MAX);

    let outcome = sqlx::query(
        r#"
        UPDATE video_records
        SET status = 'DONE',
            frames = $2,
            vehicle_totals = $3,
            class_counts = $4,
            severity = $5,
            result_key = $6,
            gps_coords = $7,
            error = NULL,
            updated_at = NOW()
        WHERE video_id = $1
          AND status NOT IN ('DONE', 'PROCESSED', 'FAILED')
        "#,
    )
    .bind(result.video_id)
    .bind(frames)
    .bind(Json(&result.vehicle_totals))
    .bind(Json(&result.class_counts))
    .bind(result.severity.to_string())
    .bind(&result.result_key)
    .bind(Json(&result.gps_coords))
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

/// Terminal failure write
pub async fn fail_record(pool: &PgPool, video_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        UPDATE video_records
        SET status = 'FAILED',
            error = $2,
            updated_at = NOW()
        WHERE video_id = $1
          AND status NOT IN ('DONE', 'PROCESSED', 'FAILED')
        "#,
    )
    .bind(video_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

/// Postgres-backed `VideoStore`.
#[derive(Clone)]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get(&self, video_id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        Ok(get_record(&self.pool, video_id).await?)
    }

    async fn list(&self, limit: i64) -> Result<Vec<VideoRecord>, StoreError> {
        Ok(list_records(&self.pool, limit).await?)
    }

    async fn insert_uploaded(
        &self,
        video_id: Uuid,
        filename: Option<&str>,
        source: &str,
        gps_coords: &[GpsCoord],
    ) -> Result<(), StoreError> {
        Ok(create_record(&self.pool, video_id, filename, source, gps_coords).await?)
    }

    async fn mark_processing(&self, job: &JobMessage) -> Result<bool, StoreError> {
        Ok(mark_processing(&self.pool, job).await?)
    }

    async fn complete(&self, result: &CountResult) -> Result<bool, StoreError> {
        Ok(complete_record(&self.pool, result).await?)
    }

    async fn fail(&self, video_id: Uuid, error: &str) -> Result<bool, StoreError> {
        Ok(fail_record(&self.pool, video_id, error).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
