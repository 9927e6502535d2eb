//! Fleet simulation: stream labelled synthetic telemetry for several
//! entities through a trained engine and tally the verdicts.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::detect::engine::AnomalyEngine;
use crate::detect::{AnomalyVerdict, DetectError};
use crate::telemetry::synthetic::{sample_of_shape, SampleShape};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confusion {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl Confusion {
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedVerdict {
    pub shape: SampleShape,
    pub verdict: AnomalyVerdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub verdicts: Vec<SimulatedVerdict>,
    pub confusion: Confusion,
}

/// Run `steps` rounds; each round sends one sample per entity. A sample is
/// drawn from a random anomaly shape with probability `anomaly_rate`, which
/// must lie in [0, 1].
pub fn run<R: Rng>(
    engine: &AnomalyEngine,
    entities: usize,
    steps: usize,
    anomaly_rate: f64,
    rng: &mut R,
) -> Result<SimulationReport, DetectError> {
    if !(0.0..=1.0).contains(&anomaly_rate) {
        return Err(DetectError::InvalidConfig(format!(
            "anomaly rate must be within [0, 1], got {anomaly_rate}"
        )));
    }
    let ids: Vec<String> = (1..=entities).map(|i| format!("sat-{i:03}")).collect();
    let mut report = SimulationReport {
        verdicts: Vec::with_capacity(entities * steps),
        confusion: Confusion::default(),
    };

    for _ in 0..steps {
        for id in &ids {
            let shape = if rng.gen_bool(anomaly_rate) {
                *SampleShape::ANOMALIES.choose(rng).unwrap_or(&SampleShape::Power)
            } else {
                SampleShape::Nominal
            };
            let sample = sample_of_shape(shape, rng);
            let verdict = engine.detect_anomaly(&sample, id)?;
            report.confusion.record(verdict.is_anomaly, shape.is_anomaly());
            report.verdicts.push(SimulatedVerdict { shape, verdict });
        }
    }
    Ok(report)
}
