//! Per-feature z-score checker over fitted normalization stats.

use serde::{Deserialize, Serialize};

use super::stats::NormalizationStats;
use crate::telemetry::{FeatureVector, TelemetrySample};

/// Outcome of one statistical check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalResult {
    pub is_anomaly: bool,
    pub z_scores: FeatureVector,
    pub max_z: f64,
}

/// Flags a sample when any single feature lies more than `z_threshold`
/// standard deviations from its training mean.
#[derive(Debug, Clone, Copy)]
pub struct StatisticalChecker {
    pub z_threshold: f64,
}

impl Default for StatisticalChecker {
    fn default() -> Self {
        Self { z_threshold: 3.0 }
    }
}

impl StatisticalChecker {
    pub fn new(z_threshold: f64) -> Self {
        Self { z_threshold }
    }

    pub fn check(&self, sample: &TelemetrySample, stats: &NormalizationStats) -> StatisticalResult {
        let z_scores = stats.z_scores(sample);
        let max_z = z_scores.iter().copied().fold(0.0_f64, f64::max);
        StatisticalResult {
            is_anomaly: max_z > self.z_threshold,
            z_scores,
            max_z,
        }
    }
}
