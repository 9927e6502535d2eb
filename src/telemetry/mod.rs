//! Telemetry samples -- the fixed 8-feature health snapshot of one satellite.
//!
//! Every model in the engine consumes features in the order given by
//! [`FEATURE_NAMES`]. Samples are plain `Copy` values owned by the caller.

pub mod synthetic;

use serde::{Deserialize, Serialize};

/// Number of scalar features in a telemetry sample.
pub const NUM_FEATURES: usize = 8;

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "temperature",
    "power",
    "communication",
    "orbit",
    "voltage",
    "solar_panel_efficiency",
    "attitude_control",
    "fuel_level",
];

/// A telemetry sample flattened into model order.
pub type FeatureVector = [f64; NUM_FEATURES];

/// One timestamped telemetry snapshot.
///
/// Units: temperature in °C, voltage in V, `orbit` is a 0-100 orbital-health
/// proxy, everything else is a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub temperature: f64,
    pub power: f64,
    pub communication: f64,
    pub orbit: f64,
    pub voltage: f64,
    pub solar_panel_efficiency: f64,
    pub attitude_control: f64,
    pub fuel_level: f64,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl TelemetrySample {
    /// A healthy snapshot in the middle of the nominal operating envelope.
    pub fn nominal(timestamp: i64) -> Self {
        Self {
            temperature: 20.0,
            power: 88.0,
            communication: 92.0,
            orbit: 98.5,
            voltage: 12.0,
            solar_panel_efficiency: 92.0,
            attitude_control: 96.0,
            fuel_level: 80.0,
            timestamp,
        }
    }

    pub fn to_vector(&self) -> FeatureVector {
        [
            self.temperature,
            self.power,
            self.communication,
            self.orbit,
            self.voltage,
            self.solar_panel_efficiency,
            self.attitude_control,
            self.fuel_level,
        ]
    }

    pub fn from_vector(values: &FeatureVector, timestamp: i64) -> Self {
        Self {
            temperature: values[0],
            power: values[1],
            communication: values[2],
            orbit: values[3],
            voltage: values[4],
            solar_panel_efficiency: values[5],
            attitude_control: values[6],
            fuel_level: values[7],
            timestamp,
        }
    }

    /// Name of the first feature that is NaN or infinite, if any.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        self.to_vector()
            .iter()
            .position(|v| !v.is_finite())
            .map(|i| FEATURE_NAMES[i])
    }
}
