//! Ensemble anomaly detection: per-entity windows, vote fusion, the engine
//! state machine and the persistent anomaly log.

pub mod engine;
pub mod fusion;
pub mod incident;
pub mod window;

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::TelemetrySample;
use fusion::{SignalScores, Votes};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("model not ready: no training cycle has completed")]
    ModelNotReady,

    #[error("insufficient training data: need {needed} samples, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("sample {index} has a non-finite {feature}")]
    InvalidSample { index: usize, feature: &'static str },

    #[error("time-series window not full: have {have}, need {need}")]
    WindowNotFull { have: usize, need: usize },

    #[error("{model} training diverged at epoch {epoch}")]
    Diverged { model: &'static str, epoch: usize },

    #[error("{model} training failed: {source}")]
    TrainingFailed {
        model: &'static str,
        source: Box<DetectError>,
    },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl DetectError {
    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::ModelNotReady => "model_not_ready",
            DetectError::InsufficientData { .. } => "insufficient_data",
            DetectError::InvalidSample { .. } => "invalid_sample",
            DetectError::WindowNotFull { .. } => "window_not_full",
            DetectError::Diverged { .. } => "diverged",
            DetectError::TrainingFailed { .. } => "training_failed",
            DetectError::InvalidConfig(_) => "invalid_config",
        }
    }

    pub(crate) fn training_failed(model: &'static str, source: DetectError) -> Self {
        DetectError::TrainingFailed {
            model,
            source: Box::new(source),
        }
    }
}

/// Severity levels for verdicts and logged anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Contribution to the fleet threat score.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 10.0,
            Severity::Medium => 40.0,
            Severity::High => 80.0,
            Severity::Critical => 100.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Category assigned by the ordered rule chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyCategory {
    #[serde(rename = "Power System Degradation")]
    PowerSystemDegradation,
    #[serde(rename = "Thermal Anomaly")]
    ThermalAnomaly,
    #[serde(rename = "Communication Loss Risk")]
    CommunicationLossRisk,
    #[serde(rename = "Orbital Decay Prediction")]
    OrbitalDecayPrediction,
    #[serde(rename = "Sensor Malfunction")]
    SensorMalfunction,
    #[serde(rename = "Normal Operation")]
    NormalOperation,
}

impl AnomalyCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyCategory::PowerSystemDegradation => "Power System Degradation",
            AnomalyCategory::ThermalAnomaly => "Thermal Anomaly",
            AnomalyCategory::CommunicationLossRisk => "Communication Loss Risk",
            AnomalyCategory::OrbitalDecayPrediction => "Orbital Decay Prediction",
            AnomalyCategory::SensorMalfunction => "Sensor Malfunction",
            AnomalyCategory::NormalOperation => "Normal Operation",
        }
    }
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one sample through the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyVerdict {
    pub entity_id: String,
    pub is_anomaly: bool,
    /// Threshold-normalised mean of the four signals.
    pub anomaly_score: f64,
    /// `min(anomaly_score, 1) * 100`, rounded.
    pub confidence: u8,
    pub features: TelemetrySample,
    pub anomaly_type: AnomalyCategory,
    pub severity: Severity,
    pub votes: Votes,
    pub signals: SignalScores,
    pub detected_at: DateTime<Utc>,
}

/// Quality and loss figures of the last completed training cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetrics {
    /// Percentages in [0, 100].
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub training_loss: f64,
    pub validation_loss: f64,
    pub cnn_loss: f64,
    pub samples_processed: u64,
    pub last_trained: DateTime<Utc>,
}

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_as_label() {
        let json = serde_json::to_string(&AnomalyCategory::PowerSystemDegradation).unwrap();
        assert_eq!(json, "\"Power System Degradation\"");
        assert_eq!(AnomalyCategory::NormalOperation.to_string(), "Normal Operation");
    }

    #[test]
    fn test_severity_roundtrip_and_order() {
        for s in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(s.as_str().parse::<Severity>().unwrap(), s);
            assert_eq!(serde_json::to_string(&s).unwrap(), format!("\"{}\"", s));
        }
        assert!(Severity::Critical > Severity::High);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn test_training_failed_names_origin() {
        let err = DetectError::training_failed("cnn", DetectError::Diverged { model: "cnn", epoch: 3 });
        assert_eq!(err.kind(), "training_failed");
        assert_eq!(err.to_string(), "cnn training failed: cnn training diverged at epoch 3");
        assert!(std::error::Error::source(&err).is_some());
    }
}
