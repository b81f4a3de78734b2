//! In-memory stand-ins for the store, job stream, event channel, object
//! storage and vision backend, plus a harness wiring them into a worker.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use vehicle_count::app_state::{AppState, WorkerContext};
use vehicle_count::config::WorkerSettings;
use vehicle_count::db::{StoreError, VideoStore};
use vehicle_count::models::event::StatusEvent;
use vehicle_count::models::job::{source_key, GpsCoord, JobMessage};
use vehicle_count::models::video::{CountResult, VideoRecord, VideoStatus};
use vehicle_count::services::consumer::Consumer;
use vehicle_count::services::events::{EventError, EventSink, StatusPublisher};
use vehicle_count::services::queue::{Delivery, JobStream, QueueError};
use vehicle_count::services::storage::{BlobStore, StorageError};
use vehicle_count::vision::{
    BoundingBox, Detection, Detector, Frame, FrameSource, TrackedBox, Tracker, VisionBackend,
    VisionError,
};

// ---------------------------------------------------------------------------
// Video store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<Uuid, VideoRecord>>,
    /// Successful `complete` / `fail` writes
    pub terminal_writes: AtomicUsize,
    down: AtomicBool,
}

impl InMemoryStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn record(&self, video_id: Uuid) -> Option<VideoRecord> {
        self.records.lock().unwrap().get(&video_id).cloned()
    }

    pub fn status(&self, video_id: Uuid) -> Option<VideoStatus> {
        self.record(video_id).map(|r| r.status)
    }

    pub fn seed(&self, video_id: Uuid, status: VideoStatus) {
        let mut record = blank_record(video_id, vec![GpsCoord(12.97, 77.59)]);
        record.status = status;
        self.records.lock().unwrap().insert(video_id, record);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

fn blank_record(video_id: Uuid, gps_coords: Vec<GpsCoord>) -> VideoRecord {
    VideoRecord {
        video_id,
        status: VideoStatus::Uploaded,
        source: None,
        filename: None,
        gps_coords,
        frames: None,
        vehicle_totals: None,
        class_counts: None,
        severity: None,
        result_key: None,
        error: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl VideoStore for InMemoryStore {
    async fn get(&self, video_id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        self.check()?;
        Ok(self.record(video_id))
    }

    async fn list(&self, limit: i64) -> Result<Vec<VideoRecord>, StoreError> {
        self.check()?;
        let mut records: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn insert_uploaded(
        &self,
        video_id: Uuid,
        filename: Option<&str>,
        source: &str,
        gps_coords: &[GpsCoord],
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut record = blank_record(video_id, gps_coords.to_vec());
        record.filename = filename.map(str::to_string);
        record.source = Some(source.to_string());
        self.records.lock().unwrap().insert(video_id, record);
        Ok(())
    }

    async fn mark_processing(&self, job: &JobMessage) -> Result<bool, StoreError> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(job.video_id)
            .or_insert_with(|| blank_record(job.video_id, job.gps_coords.clone()));
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = VideoStatus::Processing;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete(&self, result: &CountResult) -> Result<bool, StoreError> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&result.video_id) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = VideoStatus::Done;
        record.frames = Some(result.frames as i64);
        record.vehicle_totals = Some(result.vehicle_totals);
        record.class_counts = Some(result.class_counts.clone());
        record.severity = Some(result.severity);
        record.result_key = Some(result.result_key.clone());
        self.terminal_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn fail(&self, video_id: Uuid, error: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&video_id) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = VideoStatus::Failed;
        record.error = Some(error.to_string());
        self.terminal_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

// ---------------------------------------------------------------------------
// Job stream
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    next_id: u64,
    undelivered: VecDeque<Delivery>,
    /// entry_id -> (owning consumer, delivery)
    pending: HashMap<String, (String, Delivery)>,
    acked: Vec<String>,
    dead: Vec<(Delivery, String)>,
    touches: usize,
    enqueue_failures: usize,
}

/// Consumer-group semantics without idle clocks: every pending entry counts
/// as stale for `claim_stale`.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn push(&self, job: JobMessage) -> String {
        self.push_delivery(Ok(job))
    }

    pub fn push_malformed(&self, reason: &str) -> String {
        self.push_delivery(Err(reason.to_string()))
    }

    fn push_delivery(&self, job: Result<JobMessage, String>) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let entry_id = format!("1700000000000-{}", state.next_id);
        state.undelivered.push_back(Delivery {
            entry_id: entry_id.clone(),
            job,
        });
        entry_id
    }

    /// Deliver an entry to `consumer` without handling it, as a crashed
    /// worker would leave it.
    pub fn deliver_to(&self, consumer: &str) -> Option<Delivery> {
        let mut state = self.state.lock().unwrap();
        let delivery = state.undelivered.pop_front()?;
        state
            .pending
            .insert(delivery.entry_id.clone(), (consumer.to_string(), delivery.clone()));
        Some(delivery)
    }

    pub fn fail_next_enqueues(&self, n: usize) {
        self.state.lock().unwrap().enqueue_failures = n;
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().pending.keys().cloned().collect()
    }

    pub fn pending_owner(&self, entry_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .pending
            .get(entry_id)
            .map(|(owner, _)| owner.clone())
    }

    pub fn undelivered(&self) -> Vec<Delivery> {
        self.state.lock().unwrap().undelivered.iter().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.state.lock().unwrap().dead.clone()
    }

    pub fn touches(&self) -> usize {
        self.state.lock().unwrap().touches
    }
}

#[async_trait]
impl JobStream for InMemoryQueue {
    async fn ensure_group(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn enqueue(&self, job: &JobMessage) -> Result<String, QueueError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.enqueue_failures > 0 {
                state.enqueue_failures -= 1;
                return Err(QueueError::Unavailable("connection reset".into()));
            }
        }
        Ok(self.push(job.clone()))
    }

    async fn read_next(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let delivery = self.deliver_to(consumer);
        if delivery.is_none() {
            tokio::time::sleep(block).await;
        }
        Ok(delivery)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.pending.remove(entry_id);
        state.acked.push(entry_id.to_string());
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        _min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let mut claimed = Vec::new();
        for (owner, delivery) in state.pending.values_mut().take(limit) {
            *owner = consumer.to_string();
            claimed.push(delivery.clone());
        }
        Ok(claimed)
    }

    async fn touch(&self, consumer: &str, entry_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        match state.pending.get(entry_id) {
            Some((owner, _)) if owner == consumer => {
                state.touches += 1;
                Ok(())
            }
            _ => Err(QueueError::NotOwner(entry_id.to_string())),
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .unwrap()
            .dead
            .push((delivery.clone(), error.to_string()));
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().unwrap();
        Ok((state.undelivered.len() + state.pending.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event channel
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self, video_id: Uuid) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter(|e| e.video_id() == video_id)
            .map(|e| e.status())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(&self, event: &StatusEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobs {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    /// Downloads answered with a 503 before succeeding
    unavailable_downloads: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl MemoryBlobs {
    pub fn put(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn fail_next_downloads(&self, n: usize) {
        self.unavailable_downloads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.put(key, data);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.unavailable_downloads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_downloads
                .store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Status(503, key.to_string()));
        }
        self.get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Vision backend
// ---------------------------------------------------------------------------

/// What the detector and tracker report for one frame.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrame {
    pub detections: Vec<Detection>,
    pub tracked: Vec<TrackedBox>,
}

#[derive(Default)]
pub struct CallCounts {
    pub opens: AtomicUsize,
    pub detects: AtomicUsize,
    pub tracks: AtomicUsize,
}

/// Replays a fixed script: one `ScriptedFrame` per decoded frame.
pub struct ScriptedVision {
    frames: Vec<ScriptedFrame>,
    pub calls: Arc<CallCounts>,
    panic_at_frame: Option<u64>,
}

impl ScriptedVision {
    pub fn new(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            frames,
            calls: Arc::new(CallCounts::default()),
            panic_at_frame: None,
        }
    }

    pub fn panicking_at(mut self, frame: u64) -> Self {
        self.panic_at_frame = Some(frame);
        self
    }

    pub fn detect_calls(&self) -> usize {
        self.calls.detects.load(Ordering::SeqCst)
    }

    pub fn track_calls(&self) -> usize {
        self.calls.tracks.load(Ordering::SeqCst)
    }
}

struct ScriptedSource {
    total: u64,
    next: u64,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.next >= self.total {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(Frame {
            index: self.next,
            width: 1280,
            height: 720,
            pixels: Vec::new(),
        }))
    }
}

struct ScriptedDetector {
    frames: Vec<Vec<Detection>>,
    calls: Arc<CallCounts>,
    panic_at_frame: Option<u64>,
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        self.calls.detects.fetch_add(1, Ordering::SeqCst);
        if self.panic_at_frame == Some(frame.index) {
            panic!("detector crashed on frame {}", frame.index);
        }
        Ok(self
            .frames
            .get((frame.index - 1) as usize)
            .cloned()
            .unwrap_or_default())
    }
}

struct ScriptedTracker {
    frames: VecDeque<Vec<TrackedBox>>,
    calls: Arc<CallCounts>,
}

impl Tracker for ScriptedTracker {
    fn track(&mut self, _detections: &[Detection]) -> Result<Vec<TrackedBox>, VisionError> {
        self.calls.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

impl VisionBackend for ScriptedVision {
    fn open(&self, _video: Vec<u8>) -> Result<Box<dyn FrameSource>, VisionError> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            total: self.frames.len() as u64,
            next: 0,
        }))
    }

    fn detector(&self) -> Result<Box<dyn Detector>, VisionError> {
        Ok(Box::new(ScriptedDetector {
            frames: self.frames.iter().map(|f| f.detections.clone()).collect(),
            calls: self.calls.clone(),
            panic_at_frame: self.panic_at_frame,
        }))
    }

    fn tracker(&self) -> Box<dyn Tracker> {
        Box::new(ScriptedTracker {
            frames: self.frames.iter().map(|f| f.tracked.clone()).collect(),
            calls: self.calls.clone(),
        })
    }
}

/// 40x40 box centered at (cx, cy).
pub fn bbox_at(cx: f32, cy: f32) -> BoundingBox {
    BoundingBox::new(cx - 20.0, cy - 20.0, cx + 20.0, cy + 20.0)
}

pub fn detection(label: &str, cx: f32, cy: f32) -> Detection {
    Detection {
        bbox: bbox_at(cx, cy),
        label: label.to_string(),
        confidence: 0.9,
    }
}

/// A single vehicle with a fixed track ID moving down through `ys`.
pub fn vehicle_path(label: &str, track_id: u64, cx: f32, ys: &[f32]) -> Vec<ScriptedFrame> {
    ys.iter()
        .map(|&cy| ScriptedFrame {
            detections: vec![detection(label, cx, cy)],
            tracked: vec![TrackedBox {
                bbox: bbox_at(cx, cy),
                track_id,
            }],
        })
        .collect()
}

/// Ten frames of one car crossing the default line at y = 350.
pub fn one_car_crossing() -> Vec<ScriptedFrame> {
    let ys: Vec<f32> = (0..10).map(|i| 300.0 + i as f32 * 10.0).collect();
    vehicle_path("car", 1, 640.0, &ys)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryQueue>,
    pub events: Arc<RecordingEvents>,
    pub blobs: Arc<MemoryBlobs>,
    pub vision: Arc<ScriptedVision>,
    pub settings: WorkerSettings,
}

impl Harness {
    pub fn new(frames: Vec<ScriptedFrame>) -> Self {
        Self::with_vision(ScriptedVision::new(frames))
    }

    pub fn with_vision(vision: ScriptedVision) -> Self {
        let settings = WorkerSettings {
            consumer_name: "worker-a".to_string(),
            block_timeout: Duration::from_millis(10),
            progress_interval_frames: 5,
            reclaim_idle: Duration::ZERO,
            ..WorkerSettings::default()
        };
        Self {
            store: Arc::new(InMemoryStore::default()),
            queue: Arc::new(InMemoryQueue::default()),
            events: Arc::new(RecordingEvents::default()),
            blobs: Arc::new(MemoryBlobs::default()),
            vision: Arc::new(vision),
            settings,
        }
    }

    pub fn context(&self) -> WorkerContext {
        self.context_named(&self.settings.consumer_name)
    }

    pub fn context_named(&self, consumer: &str) -> WorkerContext {
        let mut settings = self.settings.clone();
        settings.consumer_name = consumer.to_string();
        WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            blobs: self.blobs.clone(),
            events: StatusPublisher::new(self.events.clone()),
            vision: self.vision.clone(),
            settings,
        }
    }

    pub fn consumer(&self) -> Consumer {
        Consumer::new(self.context())
    }

    pub fn consumer_named(&self, name: &str) -> Consumer {
        Consumer::new(self.context_named(name))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            blobs: self.blobs.clone(),
            queue: self.queue.clone(),
        }
    }

    /// Upload a source video and enqueue its job, as ingestion would.
    pub fn submit(&self) -> (Uuid, String) {
        let video_id = Uuid::new_v4();
        self.blobs.put(&source_key(video_id), b"\x00\x00\x00\x18ftypmp42");
        let entry_id = self
            .queue
            .push(JobMessage::new(video_id, vec![GpsCoord(12.97, 77.59)]));
        (video_id, entry_id)
    }
}
