use std::time::Duration;

use serde::Deserialize;

use crate::services::counting::CountingConfig;
use crate::services::events::DEFAULT_EVENT_STREAM;
use crate::services::queue::{DEFAULT_GROUP, DEFAULT_STREAM};
use crate::vision::{DefaultVision, TrackerConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue and event channel
    pub redis_url: String,

    /// Object storage bucket holding source videos and results
    pub s3_bucket: String,

    /// S3-compatible endpoint URL (MinIO, R2, ...)
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Inference service receiving one JPEG frame per request
    #[serde(default = "default_detector_url")]
    pub detector_url: String,

    #[serde(default = "default_detector_timeout_secs")]
    pub detector_timeout_secs: u64,

    #[serde(default = "default_job_stream")]
    pub job_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Unique per worker instance; falls back to HOSTNAME
    pub consumer_name: Option<String>,

    pub hostname: Option<String>,

    #[serde(default = "default_event_stream")]
    pub event_stream: String,

    #[serde(default = "default_event_stream_max_len")]
    pub event_stream_max_len: usize,

    /// Bounded wait of one consumer-group read
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Counting line in decoded-frame pixels
    #[serde(default = "default_count_line_y")]
    pub count_line_y: f32,

    #[serde(default = "default_max_association_distance")]
    pub max_association_distance: f32,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Emit a RUNNING event every N frames
    #[serde(default = "default_progress_interval_frames")]
    pub progress_interval_frames: u64,

    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    #[serde(default = "default_tracker_min_iou")]
    pub tracker_min_iou: f32,

    #[serde(default = "default_tracker_max_age")]
    pub tracker_max_age: u32,

    /// Attempts per job before recording FAILED (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Copy terminally failed jobs to `<job_stream>:dead`
    #[serde(default)]
    pub dead_letter: bool,

    /// Pending entries idle this long are claimed by a live worker.
    ///
    /// Must exceed the gap between heartbeats, which is at most
    /// `progress_interval_frames` detector calls.
    #[serde(default = "default_reclaim_idle_ms")]
    pub reclaim_idle_ms: u64,

    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,

    /// Worker Prometheus listener (e.g., "0.0.0.0:9100"); disabled when unset
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_detector_url() -> String {
    "http://localhost:8000/detect".to_string()
}

fn default_detector_timeout_secs() -> u64 {
    30
}

fn default_job_stream() -> String {
    DEFAULT_STREAM.to_string()
}

fn default_consumer_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_event_stream() -> String {
    DEFAULT_EVENT_STREAM.to_string()
}

fn default_event_stream_max_len() -> usize {
    10_000
}

fn default_block_timeout_ms() -> u64 {
    5_000
}

fn default_count_line_y() -> f32 {
    350.0
}

fn default_max_association_distance() -> f32 {
    50.0
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_progress_interval_frames() -> u64 {
    30
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

fn default_tracker_min_iou() -> f32 {
    0.3
}

fn default_tracker_max_age() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_reclaim_idle_ms() -> u64 {
    20 * 60 * 1000
}

fn default_reclaim_interval_secs() -> u64 {
    60
}

/// What to do when a job attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Total attempts for transient failures; permanent failures never retry
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each later one
    pub backoff: Duration,
    pub dead_letter: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(default_retry_backoff_ms()),
            dead_letter: false,
        }
    }
}

impl FailurePolicy {
    /// Backoff before attempt `attempt + 1`, for `attempt >= 1`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }
}

/// Tunables of the consumer loop and per-job pipeline.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub consumer_name: String,
    pub block_timeout: Duration,
    pub progress_interval_frames: u64,
    pub counting: CountingConfig,
    pub failure: FailurePolicy,
    pub reclaim_idle: Duration,
    pub reclaim_interval: Duration,
    pub reclaim_batch: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            consumer_name: "vehicle-worker-1".to_string(),
            block_timeout: Duration::from_millis(default_block_timeout_ms()),
            progress_interval_frames: default_progress_interval_frames(),
            counting: CountingConfig::default(),
            failure: FailurePolicy::default(),
            reclaim_idle: Duration::from_millis(default_reclaim_idle_ms()),
            reclaim_interval: Duration::from_secs(default_reclaim_interval_secs()),
            reclaim_batch: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .or_else(|| self.hostname.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "vehicle-worker-1".to_string())
    }

    pub fn counting(&self) -> CountingConfig {
        CountingConfig {
            count_line_y: self.count_line_y,
            max_association_distance: self.max_association_distance,
            min_confidence: self.min_confidence,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
            dead_letter: self.dead_letter,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            consumer_name: self.consumer_name(),
            // BLOCK 0 would wait forever.
            block_timeout: Duration::from_millis(self.block_timeout_ms.max(1)),
            progress_interval_frames: self.progress_interval_frames.max(1),
            counting: self.counting(),
            failure: self.failure_policy(),
            reclaim_idle: Duration::from_millis(self.reclaim_idle_ms),
            reclaim_interval: Duration::from_secs(self.reclaim_interval_secs),
            reclaim_batch: 10,
        }
    }

    /// Worst-case gap between heartbeats if every detector call hits its timeout.
    pub fn heartbeat_gap(&self) -> Duration {
        Duration::from_secs(self.detector_timeout_secs)
            .saturating_mul(self.progress_interval_frames.max(1).min(u32::MAX as u64) as u32)
    }

    /// Whether a slow but live job could be reclaimed between two heartbeats.
    pub fn heartbeat_outlasts_reclaim(&self) -> bool {
        self.heartbeat_gap() >= Duration::from_millis(self.reclaim_idle_ms)
    }

    pub fn vision(&self) -> DefaultVision {
        DefaultVision {
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            detector_url: self.detector_url.clone(),
            detector_timeout: Duration::from_secs(self.detector_timeout_secs),
            tracker: TrackerConfig {
                min_iou: self.tracker_min_iou,
                max_age: self.tracker_max_age,
            },
        }
    }
}
