use std::sync::Arc;

use crate::config::WorkerSettings;
use crate::db::VideoStore;
use crate::services::{events::StatusPublisher, queue::JobStream, storage::BlobStore};
use crate::vision::VisionBackend;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VideoStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobStream>,
}

impl AppState {
    pub fn new(
        store: impl VideoStore + 'static,
        blobs: impl BlobStore + 'static,
        queue: impl JobStream + 'static,
    ) -> Self {
        Self {
            store: Arc::new(store),
            blobs: Arc::new(blobs),
            queue: Arc::new(queue),
        }
    }
}

/// Everything a worker needs to take a job from the stream to a terminal record.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn VideoStore>,
    pub queue: Arc<dyn JobStream>,
    pub blobs: Arc<dyn BlobStore>,
    pub events: StatusPublisher,
    pub vision: Arc<dyn VisionBackend>,
    pub settings: WorkerSettings,
}
