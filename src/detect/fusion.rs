//! Majority-vote fusion of the four sub-model signals and the ordered
//! category/severity rule chain.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::detect::{AnomalyCategory, Severity};
use crate::telemetry::TelemetrySample;

/// Raw outputs of the sub-models for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalScores {
    pub reconstruction_error: f64,
    pub isolation_score: f64,
    /// Largest per-feature |z|.
    pub max_z_score: f64,
    pub statistical: bool,
    /// `None` until the entity's window is full.
    pub cnn_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Votes {
    pub reconstruction: bool,
    pub isolation: bool,
    pub statistical: bool,
    pub cnn: bool,
}

impl Votes {
    pub fn count(&self) -> usize {
        [self.reconstruction, self.isolation, self.statistical, self.cnn]
            .iter()
            .filter(|v| **v)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionThresholds {
    pub reconstruction: f64,
    pub isolation: f64,
    pub cnn: f64,
    pub min_votes: usize,
}

impl Default for FusionThresholds {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for FusionThresholds {
    fn from(config: &EngineConfig) -> Self {
        Self {
            reconstruction: config.autoencoder.threshold,
            isolation: config.forest.threshold,
            cnn: config.cnn.threshold,
            min_votes: config.fusion.min_votes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOutcome {
    pub votes: Votes,
    pub is_anomaly: bool,
    pub combined_score: f64,
    pub confidence: u8,
}

/// Combine the four signals. A missing CNN score counts as 0 and still
/// takes a quarter of the combined score.
pub fn fuse(signals: &SignalScores, thresholds: &FusionThresholds) -> FusionOutcome {
    let cnn = signals.cnn_score.unwrap_or(0.0);
    let votes = Votes {
        reconstruction: signals.reconstruction_error > thresholds.reconstruction,
        isolation: signals.isolation_score > thresholds.isolation,
        statistical: signals.statistical,
        cnn: signals.cnn_score.is_some_and(|s| s > thresholds.cnn),
    };

    let stat = if signals.statistical { 1.0 } else { 0.0 };
    let combined_score = (signals.reconstruction_error / thresholds.reconstruction
        + signals.isolation_score / thresholds.isolation
        + stat
        + cnn)
        / 4.0;

    FusionOutcome {
        votes,
        is_anomaly: votes.count() >= thresholds.min_votes,
        combined_score,
        confidence: confidence(combined_score),
    }
}

/// `min(score, 1) * 100` as an integer percentage; NaN maps to 0.
pub fn confidence(combined_score: f64) -> u8 {
    if combined_score.is_nan() {
        return 0;
    }
    (combined_score.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// First matching rule wins; later features are not reconsidered.
pub fn classify(sample: &TelemetrySample, is_anomaly: bool, confidence: u8) -> (AnomalyCategory, Severity) {
    if !is_anomaly {
        return (AnomalyCategory::NormalOperation, Severity::Low);
    }

    if sample.power < 70.0 {
        let severity = if sample.power < 50.0 { Severity::Critical } else { Severity::High };
        (AnomalyCategory::PowerSystemDegradation, severity)
    } else if sample.temperature > 60.0 || sample.temperature < -10.0 {
        let severity = if sample.temperature > 80.0 || sample.temperature < -20.0 {
            Severity::Critical
        } else {
            Severity::Medium
        };
        (AnomalyCategory::ThermalAnomaly, severity)
    } else if sample.communication < 80.0 {
        let severity = if sample.communication < 60.0 { Severity::High } else { Severity::Medium };
        (AnomalyCategory::CommunicationLossRisk, severity)
    } else if sample.orbit < 95.0 {
        let severity = if sample.orbit < 90.0 { Severity::Critical } else { Severity::High };
        (AnomalyCategory::OrbitalDecayPrediction, severity)
    } else {
        let severity = if confidence > 80 { Severity::High } else { Severity::Medium };
        (AnomalyCategory::SensorMalfunction, severity)
    }
}

/// Reference label used for model metrics: true when any first-tier rule of
/// the category chain would fire.
pub fn outside_operating_envelope(sample: &TelemetrySample) -> bool {
    sample.power < 70.0
        || sample.temperature > 60.0
        || sample.temperature < -10.0
        || sample.communication < 80.0
        || sample.orbit < 95.0
}
