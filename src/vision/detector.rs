use std::time::Duration;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{BoundingBox, Detection, Detector, Frame, VisionError};

const JPEG_QUALITY: u8 = 85;

/// Client for an object-detection inference service.
///
/// Uses a blocking HTTP client, so it must be built, used and dropped outside
/// the async runtime (inside `spawn_blocking`).
pub struct HttpDetector {
    http: Client,
    url: String,
}

#[derive(Serialize)]
struct DetectRequest {
    image: String,
    width: u32,
    height: u32,
    frame: u64,
}

#[derive(Deserialize)]
struct DetectResponse {
    detections: Vec<RawDetection>,
}

#[derive(Deserialize)]
struct RawDetection {
    bbox: [f32; 4],
    label: String,
    confidence: f32,
}

impl HttpDetector {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, VisionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    fn encode(frame: &Frame) -> Result<Vec<u8>, VisionError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.pixels.len() != expected {
            return Err(VisionError::Response(format!(
                "frame {} has {} bytes, expected {}",
                frame.index,
                frame.pixels.len(),
                expected
            )));
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(jpeg)
    }
}

impl Detector for HttpDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        let jpeg = Self::encode(frame)?;
        let body = DetectRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&jpeg),
            width: frame.width,
            height: frame.height,
            frame: frame.index,
        };

        let response: DetectResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(response
            .detections
            .into_iter()
            .map(|d| Detection {
                bbox: BoundingBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
                label: d.label,
                confidence: d.confidence,
            })
            .collect())
    }
}
