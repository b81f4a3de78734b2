//! Greedy IoU tracker.
//!
//! Detections are matched to live tracks in descending IoU order; unmatched
//! detections open new tracks and unmatched tracks coast for up to
//! `max_age` frames before being dropped. Only tracks updated on the current
//! frame are reported.

use tracing::trace;

use super::{BoundingBox, Detection, TrackedBox, Tracker, VisionError};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum IoU to continue a track with a detection
    pub min_iou: f32,
    /// Frames a track survives without a detection
    pub max_age: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_age: 30,
        }
    }
}

#[derive(Debug)]
struct LiveTrack {
    id: u64,
    bbox: BoundingBox,
    misses: u32,
}

pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<LiveTrack>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    #[cfg(test)]
    fn live_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl Tracker for IouTracker {
    fn track(&mut self, detections: &[Detection]) -> Result<Vec<TrackedBox>, VisionError> {
        let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.min_iou {
                    candidates.push((iou, ti, di));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        let mut output = Vec::with_capacity(detections.len());

        for (_, ti, di) in candidates {
            if track_taken[ti] || det_taken[di] {
                continue;
            }
            track_taken[ti] = true;
            det_taken[di] = true;

            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.misses = 0;
            output.push(TrackedBox {
                bbox: track.bbox,
                track_id: track.id,
            });
        }

        for (track, taken) in self.tracks.iter_mut().zip(&track_taken) {
            if !taken {
                track.misses += 1;
            }
        }
        let max_age = self.config.max_age;
        self.tracks.retain(|t| t.misses <= max_age);

        for (det, taken) in detections.iter().zip(det_taken) {
            if taken {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            trace!(track_id = id, label = %det.label, "New track");
            self.tracks.push(LiveTrack {
                id,
                bbox: det.bbox,
                misses: 0,
            });
            output.push(TrackedBox {
                bbox: det.bbox,
                track_id: id,
            });
        }

        Ok(output)
    }
}
