//! Reconstruction model: a dense bottleneck autoencoder over normalized
//! feature vectors.
//!
//! Architecture 8 → 16 → 8 → 4 → 8 → 16 → 8, ReLU on every hidden layer and
//! a linear output. Trained with Adam on mean-squared reconstruction error.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::layers::{Activation, Adam, Dense, Param};
use crate::config::AutoencoderConfig;
use crate::detect::DetectError;
use crate::telemetry::{FeatureVector, NUM_FEATURES};

const LAYER_WIDTHS: [usize; 7] = [NUM_FEATURES, 16, 8, 4, 8, 16, NUM_FEATURES];

/// Final losses of one fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoencoderReport {
    pub epochs: usize,
    pub train_loss: f64,
    pub validation_loss: f64,
}

#[derive(Debug, Clone)]
pub struct Autoencoder {
    layers: Vec<Dense>,
    trained: bool,
}

impl Autoencoder {
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        let last = LAYER_WIDTHS.len() - 2;
        let layers = LAYER_WIDTHS
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let activation = if i == last { Activation::Linear } else { Activation::Relu };
                Dense::new(w[0], w[1], activation, rng)
            })
            .collect();
        Self {
            layers,
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fit on `train`, report final train loss and loss on `validation`.
    ///
    /// An empty validation set reports the training loss in its place.
    pub fn fit<R: Rng>(
        &mut self,
        train: &[FeatureVector],
        validation: &[FeatureVector],
        config: &AutoencoderConfig,
        rng: &mut R,
    ) -> Result<AutoencoderReport, DetectError> {
        if train.is_empty() {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }

        let mut adam = Adam::new(config.learning_rate);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut train_loss = f64::NAN;

        for epoch in 0..config.epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(config.batch_size) {
                for &i in batch {
                    epoch_loss += self.accumulate(&train[i]);
                }
                let scale = 1.0 / batch.len() as f64;
                let mut params = self.params_mut();
                params.iter_mut().for_each(|p| p.scale_grad(scale));
                adam.step(&mut params);
            }

            train_loss = epoch_loss / train.len() as f64;
            if !train_loss.is_finite() {
                return Err(DetectError::Diverged {
                    model: "autoencoder",
                    epoch,
                });
            }
            debug!(model = "autoencoder", epoch, loss = train_loss, "epoch complete");
        }

        self.trained = true;
        let validation_loss = if validation.is_empty() {
            train_loss
        } else {
            validation.iter().map(|v| self.reconstruction_error(v)).sum::<f64>() / validation.len() as f64
        };

        Ok(AutoencoderReport {
            epochs: config.epochs,
            train_loss,
            validation_loss,
        })
    }

    /// Forward + backward for one example; returns its MSE.
    fn accumulate(&mut self, x: &FeatureVector) -> f64 {
        let activations = self.forward_all(x);
        let output = &activations[activations.len() - 1];

        let n = NUM_FEATURES as f64;
        let mut loss = 0.0;
        let mut grad: Vec<f64> = output
            .iter()
            .zip(x)
            .map(|(y, t)| {
                let diff = y - t;
                loss += diff * diff;
                2.0 * diff / n
            })
            .collect();

        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            grad = layer.backward(&activations[i], &activations[i + 1], &grad);
        }
        loss / n
    }

    /// Input followed by every layer's output.
    fn forward_all(&self, x: &FeatureVector) -> Vec<Vec<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(x.to_vec());
        for layer in &self.layers {
            let next = layer.forward(&activations[activations.len() - 1]);
            activations.push(next);
        }
        activations
    }

    fn reconstruction_error(&self, x: &FeatureVector) -> f64 {
        let out = self.reconstruct_unchecked(x);
        out.iter().zip(x).map(|(y, t)| (y - t).powi(2)).sum::<f64>() / NUM_FEATURES as f64
    }

    fn reconstruct_unchecked(&self, x: &FeatureVector) -> Vec<f64> {
        self.layers
            .iter()
            .fold(x.to_vec(), |acc, layer| layer.forward(&acc))
    }

    pub fn reconstruct(&self, x: &FeatureVector) -> Result<Vec<f64>, DetectError> {
        if !self.trained {
            return Err(DetectError::ModelNotReady);
        }
        Ok(self.reconstruct_unchecked(x))
    }

    /// Mean squared reconstruction error of a normalized vector.
    pub fn score(&self, x: &FeatureVector) -> Result<f64, DetectError> {
        if !self.trained {
            return Err(DetectError::ModelNotReady);
        }
        Ok(self.reconstruction_error(x))
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::StandardNormal;

    /// Correlated 8-D data living on a 2-D manifold plus noise.
    fn manifold(n: usize, rng: &mut StdRng) -> Vec<FeatureVector> {
        (0..n)
            .map(|_| {
                let a: f64 = rng.sample(StandardNormal);
                let b: f64 = rng.sample(StandardNormal);
                let mut v = [0.0; NUM_FEATURES];
                for (i, x) in v.iter_mut().enumerate() {
                    let noise: f64 = rng.sample(StandardNormal);
                    *x = if i % 2 == 0 { a } else { b } + 0.05 * noise;
                }
                v
            })
            .collect()
    }

    fn quick_config() -> AutoencoderConfig {
        AutoencoderConfig {
            epochs: 30,
            learning_rate: 0.005,
            ..AutoencoderConfig::default()
        }
    }

    #[test]
    fn test_untrained_model_is_not_ready() {
        let model = Autoencoder::new(&mut StdRng::seed_from_u64(0));
        assert!(!model.is_trained());
        assert!(matches!(model.score(&[0.0; NUM_FEATURES]), Err(DetectError::ModelNotReady)));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(4);
        let data = manifold(400, &mut rng);
        let (train, validation) = data.split_at(320);

        let mut model = Autoencoder::new(&mut rng);
        let before = train.iter().map(|v| model.reconstruction_error(v)).sum::<f64>() / train.len() as f64;
        let report = model.fit(train, validation, &quick_config(), &mut rng).unwrap();

        assert_eq!(report.epochs, 30);
        assert!(report.train_loss < before, "{} !< {}", report.train_loss, before);
        assert!(report.validation_loss.is_finite());
        assert!(model.is_trained());
    }

    #[test]
    fn test_off_manifold_point_scores_higher() {
        let mut rng = StdRng::seed_from_u64(5);
        let data = manifold(400, &mut rng);
        let mut model = Autoencoder::new(&mut rng);
        model.fit(&data, &[], &quick_config(), &mut rng).unwrap();

        let on = [0.0; NUM_FEATURES];
        let off = [4.0, -4.0, -4.0, 4.0, 4.0, -4.0, -4.0, 4.0];
        assert!(model.score(&off).unwrap() > model.score(&on).unwrap());
    }

    #[test]
    fn test_empty_validation_reuses_train_loss() {
        let mut rng = StdRng::seed_from_u64(6);
        let data = manifold(40, &mut rng);
        let mut model = Autoencoder::new(&mut rng);
        let cfg = AutoencoderConfig {
            epochs: 2,
            ..AutoencoderConfig::default()
        };
        let report = model.fit(&data, &[], &cfg, &mut rng).unwrap();
        assert_eq!(report.train_loss, report.validation_loss);
    }

    #[test]
    fn test_fit_rejects_empty_corpus() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = Autoencoder::new(&mut rng);
        let err = model.fit(&[], &[], &AutoencoderConfig::default(), &mut rng).unwrap_err();
        assert!(matches!(err, DetectError::InsufficientData { .. }));
        assert!(!model.is_trained());
    }
}
