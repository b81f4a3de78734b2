use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamClaimOptions, StreamId,
    StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::job::{GpsCoord, JobMessage};

pub const DEFAULT_STREAM: &str = "vehicle_count_jobs";
pub const DEFAULT_GROUP: &str = "vehicle_count_workers";

/// One entry handed to a consumer. `job` is `Err` when the entry's fields could
/// not be decoded; such entries still carry an ID so they can be acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub entry_id: String,
    pub job: Result<JobMessage, String>,
}

/// Durable job stream with consumer-group semantics.
///
/// An entry read by one consumer stays pending for that consumer until it is
/// acknowledged or claimed by another consumer.
#[async_trait]
pub trait JobStream: Send + Sync {
    /// Create the consumer group (and stream). Existing groups are left alone.
    async fn ensure_group(&self) -> Result<(), QueueError>;

    /// Append a job, returning the entry ID.
    async fn enqueue(&self, job: &JobMessage) -> Result<String, QueueError>;

    /// Block up to `block` for one never-delivered entry.
    async fn read_next(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, entry_id: &str) -> Result<(), QueueError>;

    /// Claim up to `limit` entries pending longer than `min_idle` for `consumer`.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Reset the idle time of an entry this consumer is still working on.
    /// Fails with `NotOwner` once the entry has been claimed by someone else.
    async fn touch(&self, consumer: &str, entry_id: &str) -> Result<(), QueueError>;

    /// Copy a terminally failed entry to the dead-letter stream.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError>;

    /// Entries currently retained in the stream.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Decode the `video_id` / `gps_coords` fields of a stream entry.
pub fn parse_job(video_id: Option<&str>, gps_coords: Option<&str>) -> Result<JobMessage, String> {
    let video_id = video_id.ok_or_else(|| "missing video_id".to_string())?;
    let video_id = Uuid::parse_str(video_id.trim())
        .map_err(|e| format!("invalid video_id {video_id:?}: {e}"))?;

    let gps_coords: Vec<GpsCoord> = match gps_coords {
        Some(raw) => {
            serde_json::from_str(raw).map_err(|e| format!("invalid gps_coords: {e}"))?
        }
        None => Vec::new(),
    };

    Ok(JobMessage::new(video_id, gps_coords))
}

fn owned_by(pending: &StreamPendingCountReply, entry_id: &str, consumer: &str) -> bool {
    pending
        .ids
        .iter()
        .any(|p| p.id == entry_id && p.consumer == consumer)
}

fn delivery_from_entry(entry: &StreamId) -> Delivery {
    let video_id: Option<String> = entry.get("video_id");
    let gps_coords: Option<String> = entry.get("gps_coords");
    Delivery {
        entry_id: entry.id.clone(),
        job: parse_job(video_id.as_deref(), gps_coords.as_deref()),
    }
}

/// Redis-stream-backed job queue.
pub struct JobQueue {
    client: redis::Client,
    stream: String,
    group: String,
}

impl JobQueue {
    pub fn new(redis_url: &str, stream: &str, group: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            stream: stream.to_string(),
            group: group.to_string(),
        })
    }

    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dead", self.stream)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl JobStream for JobQueue {
    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    async fn enqueue(&self, job: &JobMessage) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        let gps_coords = serde_json::to_string(&job.gps_coords).map_err(QueueError::Serialize)?;
        let entry_id: String = conn
            .xadd(
                &self.stream,
                "*",
                &[
                    ("video_id", job.video_id.to_string()),
                    ("gps_coords", gps_coords),
                ],
            )
            .await
            .map_err(QueueError::Redis)?;
        Ok(entry_id)
    }

    async fn read_next(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        // BLOCK 0 would wait forever.
        let block_ms = (block.as_millis() as usize).max(1);
        let opts = StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(1)
            .block(block_ms);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &opts)
            .await
            .map_err(QueueError::Redis)?;

        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next())
            .map(|entry| delivery_from_entry(&entry)))
    }

    async fn ack(&self, entry_id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        // XAUTOCLAIM filters on idle time server-side, so entries held by live
        // consumers never hide a stale one behind them.
        let mut claimed = Vec::new();
        let mut cursor = "0-0".to_string();
        while claimed.len() < limit {
            let reply: StreamAutoClaimReply = conn
                .xautoclaim_options(
                    &self.stream,
                    &self.group,
                    consumer,
                    min_idle_ms,
                    &cursor,
                    StreamAutoClaimOptions::default().count(limit - claimed.len()),
                )
                .await
                .map_err(QueueError::Redis)?;

            if !reply.deleted_ids.is_empty() {
                debug!(count = reply.deleted_ids.len(), "Dropped pending entries trimmed from stream");
            }
            claimed.extend(reply.claimed.iter().map(delivery_from_entry));

            if reply.next_stream_id == "0-0" {
                break;
            }
            cursor = reply.next_stream_id;
        }

        Ok(claimed)
    }

    async fn touch(&self, consumer: &str, entry_id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, entry_id, entry_id, 1)
            .await
            .map_err(QueueError::Redis)?;
        if !owned_by(&pending, entry_id, consumer) {
            return Err(QueueError::NotOwner(entry_id.to_string()));
        }

        let _: Vec<String> = conn
            .xclaim_options(
                &self.stream,
                &self.group,
                consumer,
                0,
                &[entry_id],
                StreamClaimOptions::default().with_justid(),
            )
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let (video_id, gps_coords) = match &delivery.job {
            Ok(job) => (
                job.video_id.to_string(),
                serde_json::to_string(&job.gps_coords).map_err(QueueError::Serialize)?,
            ),
            Err(_) => (String::new(), String::new()),
        };

        let _: String = conn
            .xadd(
                self.dead_letter_stream(),
                "*",
                &[
                    ("entry_id", delivery.entry_id.clone()),
                    ("video_id", video_id),
                    ("gps_coords", gps_coords),
                    ("error", error.to_string()),
                ],
            )
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.xlen(&self.stream).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Entry {0} is no longer owned by this consumer")]
    NotOwner(String),
}
