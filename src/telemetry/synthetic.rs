//! Synthetic telemetry corpus for bootstrapping training and for tests.
//!
//! `n` nominal samples are followed by `n / 10` anomalies that cycle through
//! the four shapes the category rules recognise (power, thermal,
//! communication, orbital); the combined output is shuffled.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::TelemetrySample;

/// Ground-truth shape of a generated sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleShape {
    Nominal,
    Power,
    Thermal,
    Communication,
    Orbital,
}

impl SampleShape {
    pub const ANOMALIES: [SampleShape; 4] = [
        SampleShape::Power,
        SampleShape::Thermal,
        SampleShape::Communication,
        SampleShape::Orbital,
    ];

    pub fn is_anomaly(self) -> bool {
        self != SampleShape::Nominal
    }
}

/// A generated sample together with the shape it was drawn from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LabeledSample {
    pub sample: TelemetrySample,
    pub shape: SampleShape,
}

/// Generate `n` nominal samples plus `n / 10` anomalies using OS entropy.
pub fn generate_synthetic_training_data(n: usize) -> Vec<TelemetrySample> {
    let mut rng = StdRng::from_entropy();
    generate_synthetic_training_data_with(n, &mut rng)
}

/// Seedable variant of [`generate_synthetic_training_data`].
pub fn generate_synthetic_training_data_with<R: Rng>(n: usize, rng: &mut R) -> Vec<TelemetrySample> {
    generate_labeled(n, rng).into_iter().map(|l| l.sample).collect()
}

/// Generate the corpus keeping each sample's shape.
pub fn generate_labeled<R: Rng>(n: usize, rng: &mut R) -> Vec<LabeledSample> {
    let anomalies = n / 10;
    let mut out = Vec::with_capacity(n + anomalies);

    for _ in 0..n {
        out.push(LabeledSample {
            sample: nominal_sample(rng),
            shape: SampleShape::Nominal,
        });
    }
    for i in 0..anomalies {
        let shape = SampleShape::ANOMALIES[i % SampleShape::ANOMALIES.len()];
        out.push(LabeledSample {
            sample: anomalous_sample(shape, rng),
            shape,
        });
    }

    out.shuffle(rng);

    let start = chrono::Utc::now().timestamp_millis() - out.len() as i64 * 1_000;
    for (i, labeled) in out.iter_mut().enumerate() {
        labeled.sample.timestamp = start + i as i64 * 1_000;
    }
    out
}

/// Draw one sample of the given shape.
pub fn sample_of_shape<R: Rng>(shape: SampleShape, rng: &mut R) -> TelemetrySample {
    let mut sample = match shape {
        SampleShape::Nominal => nominal_sample(rng),
        other => anomalous_sample(other, rng),
    };
    sample.timestamp = chrono::Utc::now().timestamp_millis();
    sample
}

fn gauss<R: Rng>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std_dev * z
}

fn nominal_sample<R: Rng>(rng: &mut R) -> TelemetrySample {
    // Power drives bus voltage and solar efficiency.
    let power = gauss(rng, 88.0, 5.0).clamp(72.0, 100.0);
    let voltage = 12.0 + (power - 88.0) * 0.02 + gauss(rng, 0.0, 0.3);
    let solar = (power + 4.0 + gauss(rng, 0.0, 2.5)).clamp(0.0, 100.0);

    TelemetrySample {
        temperature: gauss(rng, 20.0, 8.0).clamp(-5.0, 55.0),
        power,
        communication: gauss(rng, 92.0, 3.0).clamp(82.0, 100.0),
        orbit: gauss(rng, 98.5, 1.0).clamp(95.5, 100.0),
        voltage,
        solar_panel_efficiency: solar,
        attitude_control: gauss(rng, 96.0, 1.5).clamp(0.0, 100.0),
        fuel_level: rng.gen_range(60.0..100.0),
        timestamp: 0,
    }
}

fn anomalous_sample<R: Rng>(shape: SampleShape, rng: &mut R) -> TelemetrySample {
    let mut sample = nominal_sample(rng);
    match shape {
        SampleShape::Power => {
            sample.power = rng.gen_range(50.0..68.0);
            sample.voltage = rng.gen_range(10.0..11.2);
            sample.solar_panel_efficiency = (sample.power + gauss(rng, 0.0, 3.0)).clamp(0.0, 100.0);
        }
        SampleShape::Thermal => {
            sample.temperature = if rng.gen_bool(0.5) {
                rng.gen_range(65.0..90.0)
            } else {
                rng.gen_range(-25.0..-12.0)
            };
        }
        SampleShape::Communication => {
            sample.communication = rng.gen_range(45.0..78.0);
        }
        SampleShape::Orbital => {
            sample.orbit = rng.gen_range(86.0..94.5);
        }
        SampleShape::Nominal => {}
    }
    sample
}
