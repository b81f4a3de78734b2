use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::WorkerContext;
use crate::models::event::StatusEvent;
use crate::models::job::{result_key, JobMessage};
use crate::models::video::CountResult;
use crate::services::counting::{CountSummary, CountingConfig, CountingEngine};
use crate::services::events::StatusPublisher;
use crate::services::queue::{JobStream, QueueError};
use crate::services::severity;
use crate::services::storage::StorageError;
use crate::vision::{VisionBackend, VisionError};

/// Run the frame loop over a decoded video and return the job's counts.
///
/// Blocking: decoding and detection happen on the calling thread.
/// `on_progress` receives the frame counter every `progress_every` frames.
pub fn count_vehicles(
    vision: &dyn VisionBackend,
    video: Vec<u8>,
    config: CountingConfig,
    progress_every: u64,
    mut on_progress: impl FnMut(u64),
) -> Result<CountSummary, VisionError> {
    let mut source = vision.open(video)?;
    let mut detector = vision.detector()?;
    let mut tracker = vision.tracker();
    let mut engine = CountingEngine::new(config);
    let progress_every = progress_every.max(1);

    while let Some(frame) = source.next_frame()? {
        let detections = detector.detect(&frame)?;
        let vehicles = engine.vehicle_detections(&detections);
        let tracked = tracker.track(&vehicles)?;
        engine.observe(&detections, &tracked);

        if engine.frames() % progress_every == 0 {
            on_progress(engine.frames());
        }
    }

    Ok(engine.finish())
}

/// Download, count, classify and store the result artifact for one job.
///
/// The caller owns the terminal record write and the acknowledgment.
pub async fn process_video(
    ctx: &WorkerContext,
    entry_id: &str,
    job: &JobMessage,
) -> Result<CountResult, PipelineError> {
    let started = Instant::now();
    let video_id = job.video_id;

    let video = ctx
        .blobs
        .download(&job.source_key())
        .await
        .map_err(PipelineError::Download)?;
    debug!(video_id = %video_id, bytes = video.len(), "Downloaded source video");

    let (tx, rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_progress(
        ctx.events.clone(),
        ctx.queue.clone(),
        ctx.settings.consumer_name.clone(),
        entry_id.to_string(),
        video_id,
        rx,
    ));

    let vision = ctx.vision.clone();
    let counting = ctx.settings.counting.clone();
    let progress_every = ctx.settings.progress_interval_frames;
    let frame_loop = tokio::task::spawn_blocking(move || {
        count_vehicles(vision.as_ref(), video, counting, progress_every, |frame| {
            let _ = tx.send(frame);
        })
    })
    .await;

    // The sender went away with the blocking closure, so the forwarder drains and exits.
    if let Err(e) = forwarder.await {
        warn!(video_id = %video_id, error = %e, "Progress forwarder aborted");
    }

    let summary = frame_loop.map_err(PipelineError::from_join)??;
    let severity = severity::classify(&summary.totals);

    let result = CountResult {
        video_id,
        frames: summary.frames,
        vehicle_totals: summary.totals,
        class_counts: summary.class_counts,
        severity,
        gps_coords: job.gps_coords.clone(),
        result_key: result_key(video_id),
    };

    let artifact = serde_json::to_vec_pretty(&result)?;
    ctx.blobs
        .upload(&result.result_key, &artifact, "application/json")
        .await
        .map_err(PipelineError::Upload)?;

    info!(
        video_id = %video_id,
        frames = result.frames,
        small = result.vehicle_totals.small,
        medium = result.vehicle_totals.medium,
        heavy = result.vehicle_totals.heavy,
        total = result.vehicle_totals.total,
        severity = %severity,
        duration_ms = started.elapsed().as_millis() as u64,
        "Counting complete"
    );

    Ok(result)
}

async fn forward_progress(
    events: StatusPublisher,
    queue: Arc<dyn JobStream>,
    consumer: String,
    entry_id: String,
    video_id: Uuid,
    mut rx: mpsc::UnboundedReceiver<u64>,
) {
    while let Some(frame) = rx.recv().await {
        events.publish(StatusEvent::Running { video_id, frame }).await;

        match queue.touch(&consumer, &entry_id).await {
            Ok(()) => {}
            Err(QueueError::NotOwner(_)) => {
                warn!(video_id = %video_id, entry_id = %entry_id, "Entry reclaimed by another consumer")
            }
            Err(e) => {
                warn!(video_id = %video_id, entry_id = %entry_id, error = %e, "Heartbeat failed")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to fetch source video: {0}")]
    Download(StorageError),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("Failed to store result artifact: {0}")]
    Upload(StorageError),

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Frame loop panicked: {0}")]
    Panicked(String),

    #[error("Frame loop cancelled")]
    Cancelled,
}

impl PipelineError {
    fn from_join(err: JoinError) -> Self {
        if !err.is_panic() {
            return Self::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }

    /// Whether another attempt of the same job could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Download(e) | Self::Upload(e) => e.is_transient(),
            Self::Vision(e) => e.is_transient(),
            Self::Serialize(_) | Self::Panicked(_) | Self::Cancelled => false,
        }
    }
}
