use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::models::video::{Severity, VehicleTotals};

/// Lifecycle event published to the observation channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Processing {
        video_id: Uuid,
    },
    Running {
        video_id: Uuid,
        frame: u64,
    },
    Done {
        video_id: Uuid,
        vehicle_totals: VehicleTotals,
        severity: Severity,
    },
    Failed {
        video_id: Uuid,
        error: String,
    },
}

impl StatusEvent {
    pub fn video_id(&self) -> Uuid {
        match self {
            Self::Processing { video_id }
            | Self::Running { video_id, .. }
            | Self::Done { video_id, .. }
            | Self::Failed { video_id, .. } => *video_id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Processing { .. } => "PROCESSING",
            Self::Running { .. } => "RUNNING",
            Self::Done { .. } => "DONE",
            Self::Failed { .. } => "FAILED",
        }
    }

    /// Flat field list for a stream entry.
    pub fn fields(&self, at: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("video_id", self.video_id().to_string()),
            ("status", self.status().to_string()),
            ("ts", at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ];

        match self {
            Self::Processing { .. } => {}
            Self::Running { frame, .. } => fields.push(("frame", frame.to_string())),
            Self::Done {
                vehicle_totals,
                severity,
                ..
            } => {
                let totals = serde_json::to_string(vehicle_totals).unwrap_or_default();
                fields.push(("vehicle_totals", totals));
                fields.push(("severity", severity.to_string()));
            }
            Self::Failed { error, .. } => fields.push(("error", error.clone())),
        }

        fields
    }
}
