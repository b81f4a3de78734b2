use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::job::GpsCoord;

/// Lifecycle of a video record.
///
/// `UPLOADED → PROCESSING → {DONE | PROCESSED} | FAILED`. No transition leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Uploaded,
    Processing,
    Done,
    Processed,
    Failed,
}

impl VideoStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Processed | Self::Failed)
    }
}

/// Vehicle size class used for counting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "title_case")]
pub enum VehicleCategory {
    Small,
    Medium,
    Heavy,
}

impl VehicleCategory {
    /// Fixed detector label → category table. Labels outside it are not vehicles.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "motorcycle" => Some(Self::Small),
            "car" | "van" => Some(Self::Medium),
            "bus" | "truck" => Some(Self::Heavy),
            _ => None,
        }
    }
}

/// Counted vehicles per category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VehicleTotals {
    pub small: u64,
    pub medium: u64,
    pub heavy: u64,
    pub total: u64,
}

impl VehicleTotals {
    pub fn new(small: u64, medium: u64, heavy: u64) -> Self {
        Self {
            small,
            medium,
            heavy,
            total: small.saturating_add(medium).saturating_add(heavy),
        }
    }

    pub fn increment(&mut self, category: VehicleCategory) {
        match category {
            VehicleCategory::Small => self.small += 1,
            VehicleCategory::Medium => self.medium += 1,
            VehicleCategory::Heavy => self.heavy += 1,
        }
        self.total += 1;
    }
}

/// Raw histogram of detector labels, independent of tracking.
pub type ClassCounts = BTreeMap<String, u64>;

/// Traffic severity verdict derived from vehicle totals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Good,
    Moderate,
    Poor,
    Critical,
}

/// Persisted state of one uploaded video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: Uuid,
    pub status: VideoStatus,
    pub source: Option<String>,
    pub filename: Option<String>,
    pub gps_coords: Vec<GpsCoord>,
    pub frames: Option<i64>,
    pub vehicle_totals: Option<VehicleTotals>,
    pub class_counts: Option<ClassCounts>,
    pub severity: Option<Severity>,
    pub result_key: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a successful counting run, written once as the terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountResult {
    pub video_id: Uuid,
    pub frames: u64,
    pub vehicle_totals: VehicleTotals,
    pub class_counts: ClassCounts,
    pub severity: Severity,
    pub gps_coords: Vec<GpsCoord>,
    pub result_key: String,
}
