use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::job::{source_key, GpsError, GpsTrack, JobMessage};
use crate::models::video::VideoStatus;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

pub const CCTV_SOURCE: &str = "CCTV";

const ENQUEUE_ATTEMPTS: u32 = 3;
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(200);

/// Accepted upload, as returned to the client.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Submission {
    pub video_id: Uuid,
    pub status: VideoStatus,
    pub source: String,
}

/// Store the video, persist an `UPLOADED` record, then enqueue the job.
///
/// The job is only appended after both the blob and the record exist, so a
/// worker never sees a job whose source is missing.
pub async fn submit_video(
    state: &AppState,
    data: &[u8],
    filename: Option<&str>,
    gps_coords: &str,
) -> Result<Submission, IngestError> {
    if data.is_empty() {
        return Err(IngestError::EmptyFile);
    }
    let track = GpsTrack::parse(gps_coords)?;

    let video_id = Uuid::new_v4();
    state
        .blobs
        .upload(&source_key(video_id), data, "video/mp4")
        .await?;
    state
        .store
        .insert_uploaded(video_id, filename, CCTV_SOURCE, &track.coords)
        .await?;

    let job = JobMessage::new(video_id, track.coords);
    let entry_id = enqueue_with_retry(state, &job).await?;

    metrics::counter!("vehicle_count_jobs_submitted").increment(1);
    info!(
        video_id = %video_id,
        entry_id = %entry_id,
        bytes = data.len(),
        gps_points = job.gps_coords.len(),
        "Video accepted"
    );

    Ok(Submission {
        video_id,
        status: VideoStatus::Uploaded,
        source: CCTV_SOURCE.to_string(),
    })
}

/// Append a fresh job for an existing, non-terminal record.
pub async fn requeue(state: &AppState, video_id: Uuid) -> Result<String, IngestError> {
    let record = state
        .store
        .get(video_id)
        .await?
        .ok_or(IngestError::NotFound(video_id))?;

    if record.status.is_terminal() {
        return Err(IngestError::Terminal(record.status));
    }

    let job = JobMessage::new(video_id, record.gps_coords);
    let entry_id = enqueue_with_retry(state, &job).await?;
    info!(video_id = %video_id, entry_id = %entry_id, "Video requeued");
    Ok(entry_id)
}

async fn enqueue_with_retry(state: &AppState, job: &JobMessage) -> Result<String, QueueError> {
    let mut attempt = 1;
    loop {
        match state.queue.enqueue(job).await {
            Ok(entry_id) => return Ok(entry_id),
            Err(e) if attempt < ENQUEUE_ATTEMPTS => {
                warn!(video_id = %job.video_id, attempt, error = %e, "Enqueue failed, retrying");
                sleep(ENQUEUE_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error(transparent)]
    Gps(#[from] GpsError),

    #[error("Video {0} not found")]
    NotFound(Uuid),

    #[error("Video already in terminal state {0}")]
    Terminal(VideoStatus),

    #[error("Failed to store video: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to persist record: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
}
