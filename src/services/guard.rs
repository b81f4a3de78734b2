use tracing::{debug, info};

use crate::db::{StoreError, VideoStore};
use crate::models::job::JobMessage;
use crate::models::video::VideoStatus;

/// Outcome of the idempotency check run before any processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// The record already holds a terminal status; acknowledge without work.
    Skip(VideoStatus),
    /// The record is now `PROCESSING` and the job may run.
    Proceed,
}

/// Consult the persistent record and claim it for processing.
///
/// A store error is returned unchanged so the caller can leave the entry
/// pending instead of acknowledging it.
pub async fn check(store: &dyn VideoStore, job: &JobMessage) -> Result<GuardDecision, StoreError> {
    if let Some(record) = store.get(job.video_id).await? {
        if record.status.is_terminal() {
            info!(
                video_id = %job.video_id,
                status = %record.status,
                "Video already in terminal state, skipping"
            );
            return Ok(GuardDecision::Skip(record.status));
        }
    }

    if store.mark_processing(job).await? {
        debug!(video_id = %job.video_id, "Record marked PROCESSING");
        return Ok(GuardDecision::Proceed);
    }

    // Another worker finished the job between the read and the upsert.
    let status = store
        .get(job.video_id)
        .await?
        .map(|r| r.status)
        .unwrap_or(VideoStatus::Done);
    info!(video_id = %job.video_id, status = %status, "Lost race to terminal write, skipping");
    Ok(GuardDecision::Skip(status))
}
