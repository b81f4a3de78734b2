//! Track-to-category assignment and line-crossing counter.
//!
//! One `CountingEngine` lives for exactly one job's frame loop. Each physical
//! vehicle (one tracker ID) increments its category at most once: the first
//! frame its vertical center is at or below the counting line while it has a
//! known category.

use std::collections::HashMap;

use crate::models::video::{ClassCounts, VehicleCategory, VehicleTotals};
use crate::vision::{BoundingBox, Detection, TrackedBox};

#[derive(Debug, Clone)]
pub struct CountingConfig {
    /// Horizontal line (frame y coordinate) a track must reach to be counted
    pub count_line_y: f32,
    /// Max center distance for a tracked box to take a detection's category
    pub max_association_distance: f32,
    /// Detections below this confidence are ignored for tracking and counting
    pub min_confidence: f32,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            count_line_y: 350.0,
            max_association_distance: 50.0,
            min_confidence: 0.3,
        }
    }
}

/// A vehicle detection reduced to what association needs.
#[derive(Debug, Clone, Copy)]
pub struct CategorizedBox {
    pub bbox: BoundingBox,
    pub category: VehicleCategory,
}

/// Strategy picking a category for a tracked box from same-frame detections.
pub trait Associator: Send {
    fn associate(&self, tracked: &BoundingBox, candidates: &[CategorizedBox]) -> Option<VehicleCategory>;
}

/// Closest detection by center distance, accepted strictly below `max_distance`.
/// Ties keep the earliest candidate.
#[derive(Debug, Clone, Copy)]
pub struct NearestCenter {
    pub max_distance: f32,
}

impl Associator for NearestCenter {
    fn associate(&self, tracked: &BoundingBox, candidates: &[CategorizedBox]) -> Option<VehicleCategory> {
        let mut best: Option<(f32, VehicleCategory)> = None;
        for candidate in candidates {
            let d = tracked.center_distance(&candidate.bbox);
            if d >= self.max_distance {
                continue;
            }
            if best.map_or(true, |(min, _)| d < min) {
                best = Some((d, candidate.category));
            }
        }
        best.map(|(_, category)| category)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TrackState {
    category: Option<VehicleCategory>,
    counted: bool,
}

/// Per-job counting state machine.
pub struct CountingEngine {
    config: CountingConfig,
    associator: Box<dyn Associator>,
    tracks: HashMap<u64, TrackState>,
    totals: VehicleTotals,
    class_counts: ClassCounts,
    frames: u64,
}

/// Final counts of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct CountSummary {
    pub frames: u64,
    pub totals: VehicleTotals,
    pub class_counts: ClassCounts,
}

impl CountingEngine {
    pub fn new(config: CountingConfig) -> Self {
        let associator = NearestCenter {
            max_distance: config.max_association_distance,
        };
        Self::with_associator(config, Box::new(associator))
    }

    pub fn with_associator(config: CountingConfig, associator: Box<dyn Associator>) -> Self {
        Self {
            config,
            associator,
            tracks: HashMap::new(),
            totals: VehicleTotals::default(),
            class_counts: ClassCounts::new(),
            frames: 0,
        }
    }

    /// Detections worth handing to the tracker: confident vehicle detections.
    pub fn vehicle_detections(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence)
            .filter(|d| VehicleCategory::from_label(&d.label).is_some())
            .cloned()
            .collect()
    }

    /// Feed one frame: every raw detection (histogram) and the tracker's boxes.
    pub fn observe(&mut self, detections: &[Detection], tracked: &[TrackedBox]) {
        self.frames += 1;

        for det in detections {
            *self.class_counts.entry(det.label.clone()).or_insert(0) += 1;
        }

        let candidates: Vec<CategorizedBox> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence)
            .filter_map(|d| {
                VehicleCategory::from_label(&d.label).map(|category| CategorizedBox {
                    bbox: d.bbox,
                    category,
                })
            })
            .collect();

        for tb in tracked {
            let state = self.tracks.entry(tb.track_id).or_default();

            if let Some(category) = self.associator.associate(&tb.bbox, &candidates) {
                state.category = Some(category);
            }

            let Some(category) = state.category else {
                continue;
            };

            let (_, center_y) = tb.bbox.center();
            if center_y >= self.config.count_line_y && !state.counted {
                state.counted = true;
                self.totals.increment(category);
            }
        }
    }

    pub fn totals(&self) -> VehicleTotals {
        self.totals
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finish(self) -> CountSummary {
        CountSummary {
            frames: self.frames,
            totals: self.totals,
            class_counts: self.class_counts,
        }
    }
}
