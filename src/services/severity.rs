use crate::models::video::{Severity, VehicleTotals};

const MODERATE_FROM: u64 = 50;
const POOR_FROM: u64 = 120;
const CRITICAL_FROM: u64 = 250;

/// Weighted load: small ×1, medium ×2, heavy ×3.
pub fn score(totals: &VehicleTotals) -> u64 {
    totals
        .small
        .saturating_add(totals.medium.saturating_mul(2))
        .saturating_add(totals.heavy.saturating_mul(3))
}

/// Map totals to a severity label. Bucket boundaries belong to the upper bucket.
pub fn classify(totals: &VehicleTotals) -> Severity {
    match score(totals) {
        s if s >= CRITICAL_FROM => Severity::Critical,
        s if s >= POOR_FROM => Severity::Poor,
        s if s >= MODERATE_FROM => Severity::Moderate,
        _ => Severity::Good,
    }
}
