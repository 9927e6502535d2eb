//! Statistical baselines over telemetry features.

pub mod statistical;
pub mod stats;
