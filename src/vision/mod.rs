//! Detector/tracker capability consumed by the counting pipeline.
//!
//! The pipeline only depends on the traits in this module. Every call here may
//! block for a long time, so implementations are driven from a blocking thread
//! and never from the async runtime directly.

pub mod detector;
pub mod ffmpeg;
pub mod tracker;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use detector::HttpDetector;
pub use ffmpeg::FfmpegFrameSource;
pub use tracker::{IouTracker, TrackerConfig};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Euclidean distance between box centers.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }
}

/// One detector output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

/// Tracker output: a box plus the identity of the physical object behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedBox {
    pub bbox: BoundingBox,
    pub track_id: u64,
}

/// Decoded RGB24 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based position in the source video.
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub trait FrameSource: Send {
    /// Next frame in source order, `None` once the video is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError>;
}

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, VisionError>;
}

/// Stateful multi-object tracker. A fresh instance starts a fresh ID space.
pub trait Tracker: Send {
    fn track(&mut self, detections: &[Detection]) -> Result<Vec<TrackedBox>, VisionError>;
}

/// Factory for the per-job vision components.
///
/// Every method is called from a blocking thread.
pub trait VisionBackend: Send + Sync {
    fn open(&self, video: Vec<u8>) -> Result<Box<dyn FrameSource>, VisionError>;
    fn detector(&self) -> Result<Box<dyn Detector>, VisionError>;
    fn tracker(&self) -> Box<dyn Tracker>;
}

/// ffmpeg decoding + HTTP detector + IoU tracker.
#[derive(Debug, Clone)]
pub struct DefaultVision {
    pub frame_width: u32,
    pub frame_height: u32,
    pub detector_url: String,
    pub detector_timeout: Duration,
    pub tracker: TrackerConfig,
}

impl VisionBackend for DefaultVision {
    fn open(&self, video: Vec<u8>) -> Result<Box<dyn FrameSource>, VisionError> {
        let source = FfmpegFrameSource::spawn(&video, self.frame_width, self.frame_height)?;
        Ok(Box::new(source))
    }

    fn detector(&self) -> Result<Box<dyn Detector>, VisionError> {
        let detector = HttpDetector::new(&self.detector_url, self.detector_timeout)?;
        Ok(Box::new(detector))
    }

    fn tracker(&self) -> Box<dyn Tracker> {
        Box::new(IouTracker::new(self.tracker.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Failed to start decoder: {0}")]
    Spawn(std::io::Error),

    #[error("Cannot open video: {0}")]
    Open(String),

    #[error("Frame read failed: {0}")]
    Read(std::io::Error),

    #[error("Detector request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Invalid detector response: {0}")]
    Response(String),
}

impl VisionError {
    /// Whether retrying the same job could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::Http(_))
    }
}
