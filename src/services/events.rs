use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::models::event::StatusEvent;

pub const DEFAULT_EVENT_STREAM: &str = "vehicle_count_events";

/// Append-only channel for lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &StatusEvent) -> Result<(), EventError>;
}

/// Redis stream sink capped at roughly `max_len` entries.
pub struct RedisEventSink {
    client: redis::Client,
    stream: String,
    max_len: usize,
}

impl RedisEventSink {
    pub fn new(redis_url: &str, stream: &str, max_len: usize) -> Result<Self, EventError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            stream: stream.to_string(),
            max_len,
        })
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn publish(&self, event: &StatusEvent) -> Result<(), EventError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields = event.fields(Utc::now());
        let _: String = conn
            .xadd_maxlen(&self.stream, StreamMaxlen::Approx(self.max_len), "*", fields.as_slice())
            .await?;
        Ok(())
    }
}

/// Fire-and-forget front for an `EventSink`: failures are logged, never returned.
#[derive(Clone)]
pub struct StatusPublisher {
    sink: Arc<dyn EventSink>,
}

impl StatusPublisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn publish(&self, event: StatusEvent) {
        match self.sink.publish(&event).await {
            Ok(()) => debug!(
                video_id = %event.video_id(),
                status = event.status(),
                "Published status event"
            ),
            Err(e) => warn!(
                video_id = %event.video_id(),
                status = event.status(),
                error = %e,
                "Failed to publish status event"
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Event channel unavailable: {0}")]
    Unavailable(String),
}
