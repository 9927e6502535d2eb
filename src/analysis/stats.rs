use serde::{Deserialize, Serialize};

use crate::detect::DetectError;
use crate::telemetry::{FeatureVector, TelemetrySample, FEATURE_NAMES, NUM_FEATURES};

/// Per-feature baseline fitted on one training corpus.
///
/// Population standard deviation; every division goes through [`Self::scale`]
/// so a constant feature never divides by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationStats {
    pub mean: FeatureVector,
    pub std_dev: FeatureVector,
    pub sample_count: u64,
    pub epsilon: f64,
}

impl NormalizationStats {
    /// Fit mean and standard deviation of each feature independently.
    pub fn fit(samples: &[TelemetrySample], epsilon: f64) -> Result<Self, DetectError> {
        let vectors: Vec<FeatureVector> = samples.iter().map(TelemetrySample::to_vector).collect();
        Self::fit_vectors(&vectors, epsilon)
    }

    pub fn fit_vectors(vectors: &[FeatureVector], epsilon: f64) -> Result<Self, DetectError> {
        if vectors.is_empty() {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }
        for (index, v) in vectors.iter().enumerate() {
            if let Some(i) = v.iter().position(|x| !x.is_finite()) {
                return Err(DetectError::InvalidSample {
                    index,
                    feature: FEATURE_NAMES[i],
                });
            }
        }

        let count = vectors.len() as f64;
        let mut mean = [0.0; NUM_FEATURES];
        for v in vectors {
            for (m, x) in mean.iter_mut().zip(v) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= count;
        }

        let mut std_dev = [0.0; NUM_FEATURES];
        for v in vectors {
            for i in 0..NUM_FEATURES {
                let diff = v[i] - mean[i];
                std_dev[i] += diff * diff;
            }
        }
        for s in &mut std_dev {
            *s = (*s / count).sqrt();
        }

        Ok(Self {
            mean,
            std_dev,
            sample_count: vectors.len() as u64,
            epsilon,
        })
    }

    /// Divisor for feature `i`: the standard deviation floored at epsilon.
    pub fn scale(&self, i: usize) -> f64 {
        self.std_dev[i].max(self.epsilon)
    }

    pub fn normalize(&self, sample: &TelemetrySample) -> FeatureVector {
        self.normalize_vector(&sample.to_vector())
    }

    pub fn normalize_vector(&self, raw: &FeatureVector) -> FeatureVector {
        let mut out = [0.0; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            out[i] = (raw[i] - self.mean[i]) / self.scale(i);
        }
        out
    }

    /// Absolute z-score of every feature.
    pub fn z_scores(&self, sample: &TelemetrySample) -> FeatureVector {
        let mut z = self.normalize(sample);
        for v in &mut z {
            *v = v.abs();
        }
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::synthetic::generate_synthetic_training_data_with;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mean_sample_normalizes_to_zero() {
        for seed in 0..5 {
            let corpus = generate_synthetic_training_data_with(300, &mut StdRng::seed_from_u64(seed));
            let stats = NormalizationStats::fit(&corpus, 1e-8).unwrap();

            let normalized = stats.normalize_vector(&stats.mean);
            for v in normalized {
                assert!(v.abs() < 1e-9, "seed {seed}: {normalized:?}");
            }
        }
    }

    #[test]
    fn test_population_std_dev() {
        let vectors: Vec<FeatureVector> = [1.0, 2.0, 3.0, 4.0, 5.0]
            .iter()
            .map(|&x| [x; NUM_FEATURES])
            .collect();
        let stats = NormalizationStats::fit_vectors(&vectors, 1e-8).unwrap();
        assert_eq!(stats.mean[0], 3.0);
        // population variance of 1..5 is 2.0
        assert!((stats.std_dev[0] - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.sample_count, 5);
    }

    #[test]
    fn test_constant_corpus_is_floored() {
        let sample = TelemetrySample::nominal(0);
        let corpus = vec![sample; 25];
        let stats = NormalizationStats::fit(&corpus, 1e-8).unwrap();

        assert!(stats.std_dev.iter().all(|s| *s == 0.0));
        assert_eq!(stats.scale(3), 1e-8);
        let normalized = stats.normalize(&sample);
        assert!(normalized.iter().all(|v| *v == 0.0));

        // single sample behaves the same
        let single = NormalizationStats::fit(&[sample], 1e-8).unwrap();
        assert!(single.normalize(&sample).iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_fit_rejects_empty_and_non_finite() {
        assert!(matches!(
            NormalizationStats::fit(&[], 1e-8),
            Err(DetectError::InsufficientData { needed: 1, have: 0 })
        ));

        let mut bad = TelemetrySample::nominal(0);
        bad.orbit = f64::INFINITY;
        let err = NormalizationStats::fit(&[TelemetrySample::nominal(0), bad], 1e-8).unwrap_err();
        assert!(matches!(err, DetectError::InvalidSample { index: 1, feature: "orbit" }));
    }
}
