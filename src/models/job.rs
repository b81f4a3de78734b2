use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single GPS fix, serialized as a `[lat, lon]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct GpsCoord(
    #[garde(range(min = -90.0, max = 90.0))] pub f64,
    #[garde(range(min = -180.0, max = 180.0))] pub f64,
);

impl GpsCoord {
    pub fn lat(&self) -> f64 {
        self.0
    }

    pub fn lon(&self) -> f64 {
        self.1
    }
}

/// GPS track submitted alongside an upload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(transparent)]
pub struct GpsTrack {
    #[garde(length(min = 1), dive)]
    pub coords: Vec<GpsCoord>,
}

impl GpsTrack {
    /// Parse and validate the `gps_coords` form field.
    pub fn parse(raw: &str) -> Result<Self, GpsError> {
        let track: GpsTrack = serde_json::from_str(raw).map_err(GpsError::Json)?;
        track.validate().map_err(|e| GpsError::Invalid(e.to_string()))?;
        Ok(track)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GpsError {
    #[error("gps_coords must be valid JSON: {0}")]
    Json(serde_json::Error),

    #[error("gps_coords must be a non-empty list of [lat, lon] pairs: {0}")]
    Invalid(String),
}

/// Job envelope appended to the job stream. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub video_id: Uuid,
    pub gps_coords: Vec<GpsCoord>,
}

impl JobMessage {
    pub fn new(video_id: Uuid, gps_coords: Vec<GpsCoord>) -> Self {
        Self {
            video_id,
            gps_coords,
        }
    }

    /// Object storage key of the uploaded source video.
    pub fn source_key(&self) -> String {
        source_key(self.video_id)
    }
}

pub fn source_key(video_id: Uuid) -> String {
    format!("{video_id}.mp4")
}

pub fn result_key(video_id: Uuid) -> String {
    format!("results/{video_id}.json")
}
