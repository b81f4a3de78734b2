use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{GpsCoord, JobMessage};
use crate::models::video::{CountResult, VideoRecord};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persistent video records.
///
/// Transitions into `PROCESSING` and into a terminal status are conditional:
/// they return `false` and change nothing once the record is terminal.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get(&self, video_id: Uuid) -> Result<Option<VideoRecord>, StoreError>;

    async fn list(&self, limit: i64) -> Result<Vec<VideoRecord>, StoreError>;

    async fn insert_uploaded(
        &self,
        video_id: Uuid,
        filename: Option<&str>,
        source: &str,
        gps_coords: &[GpsCoord],
    ) -> Result<(), StoreError>;

    /// Upsert the record as `PROCESSING`.
    async fn mark_processing(&self, job: &JobMessage) -> Result<bool, StoreError>;

    /// Single terminal write for a successful run (`DONE`).
    async fn complete(&self, result: &CountResult) -> Result<bool, StoreError>;

    /// Single terminal write for an unrecoverable failure (`FAILED`).
    async fn fail(&self, video_id: Uuid, error: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub mod queries;

pub use queries::PgVideoStore;
