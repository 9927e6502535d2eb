use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::statistical::StatisticalChecker;
use crate::analysis::stats::NormalizationStats;
use crate::config::EngineConfig;
use crate::detect::fusion::{self, FusionThresholds, SignalScores};
use crate::detect::window::WindowRegistry;
use crate::detect::{lock, AnomalyVerdict, DetectError, ModelMetrics};
use crate::ml::autoencoder::Autoencoder;
use crate::ml::cnn::{cut_training_windows, TimeSeriesCnn};
use crate::ml::isolation_forest::IsolationForest;
use crate::telemetry::{FeatureVector, TelemetrySample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Training,
    Ready,
}

/// Everything one training cycle produces. Immutable once built, so a
/// snapshot can never mix stats from one cycle with trees from another.
#[derive(Debug)]
pub struct TrainedEnsemble {
    stats: NormalizationStats,
    checker: StatisticalChecker,
    autoencoder: Autoencoder,
    forest: IsolationForest,
    cnn: TimeSeriesCnn,
    metrics: ModelMetrics,
}

impl TrainedEnsemble {
    /// Fit every sub-model on `samples`. All-or-nothing: any sub-model
    /// failure aborts the whole build.
    pub fn build<R: Rng>(
        samples: &[TelemetrySample],
        config: &EngineConfig,
        rng: &mut R,
    ) -> Result<Self, DetectError> {
        if samples.is_empty() {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }
        for (index, sample) in samples.iter().enumerate() {
            if let Some(feature) = sample.first_non_finite() {
                return Err(DetectError::InvalidSample { index, feature });
            }
        }

        let stats = NormalizationStats::fit(samples, config.normalizer.epsilon)
            .map_err(|e| DetectError::training_failed("normalizer", e))?;
        let checker = StatisticalChecker::new(config.statistical.z_threshold);
        let normalized: Vec<FeatureVector> = samples.iter().map(|s| stats.normalize(s)).collect();

        // validation split, always leaving at least one training row
        let n = samples.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let validation_len = ((n as f64 * config.autoencoder.validation_split).floor() as usize).min(n - 1);
        let (validation_idx, train_idx) = order.split_at(validation_len);
        let train_vectors: Vec<FeatureVector> = train_idx.iter().map(|&i| normalized[i]).collect();
        let validation_vectors: Vec<FeatureVector> = validation_idx.iter().map(|&i| normalized[i]).collect();

        let mut ae_rng = StdRng::seed_from_u64(rng.gen());
        let mut autoencoder = Autoencoder::new(&mut ae_rng);
        let ae_report = autoencoder
            .fit(&train_vectors, &validation_vectors, &config.autoencoder, &mut ae_rng)
            .map_err(|e| DetectError::training_failed("autoencoder", e))?;
        debug!(
            train_loss = ae_report.train_loss,
            validation_loss = ae_report.validation_loss,
            "autoencoder trained"
        );

        let mut forest_rng = StdRng::seed_from_u64(rng.gen());
        let mut forest = IsolationForest::new(&config.forest);
        forest
            .fit(&normalized, &mut forest_rng)
            .map_err(|e| DetectError::training_failed("isolation_forest", e))?;

        let flagged: Vec<bool> = samples.iter().map(|s| checker.check(s, &stats).is_anomaly).collect();
        let windows = cut_training_windows(
            &normalized,
            &flagged,
            config.cnn.window_length,
            config.cnn.max_training_windows,
        );
        let mut cnn_rng = StdRng::seed_from_u64(rng.gen());
        let mut cnn = TimeSeriesCnn::new(&config.cnn, &mut cnn_rng);
        let cnn_report = cnn
            .fit(&windows, &config.cnn, &mut cnn_rng)
            .map_err(|e| DetectError::training_failed("cnn", e))?;
        debug!(
            windows = cnn_report.windows,
            positive = cnn_report.positive_windows,
            loss = cnn_report.loss,
            "cnn trained"
        );

        let mut ensemble = Self {
            stats,
            checker,
            autoencoder,
            forest,
            cnn,
            metrics: ModelMetrics {
                accuracy: 0.0,
                precision: 0.0,
                recall: 0.0,
                f1_score: 0.0,
                training_loss: ae_report.train_loss,
                validation_loss: ae_report.validation_loss,
                cnn_loss: cnn_report.loss,
                samples_processed: n as u64,
                last_trained: chrono::Utc::now(),
            },
        };

        let eval_idx = if validation_idx.is_empty() { train_idx } else { validation_idx };
        let thresholds = FusionThresholds::from(config);
        ensemble.evaluate(samples, eval_idx, &thresholds)?;
        Ok(ensemble)
    }

    /// Score the point-wise ensemble decision (no CNN vote) against the
    /// operating-envelope labels.
    fn evaluate(
        &mut self,
        samples: &[TelemetrySample],
        indices: &[usize],
        thresholds: &FusionThresholds,
    ) -> Result<(), DetectError> {
        let (mut tp, mut fp, mut tn, mut fn_) = (0u64, 0u64, 0u64, 0u64);
        for &i in indices {
            let sample = &samples[i];
            let predicted = fusion::fuse(&self.signals(sample, None)?, thresholds).is_anomaly;
            match (predicted, fusion::outside_operating_envelope(sample)) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }

        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        self.metrics.accuracy = ratio(tp + tn, indices.len() as u64) * 100.0;
        self.metrics.precision = precision * 100.0;
        self.metrics.recall = recall * 100.0;
        self.metrics.f1_score = f1 * 100.0;
        Ok(())
    }

    /// Sub-model outputs for one sample. `window` is the entity's full
    /// window (oldest first) or `None` while it is still filling.
    pub fn signals(
        &self,
        sample: &TelemetrySample,
        window: Option<&[TelemetrySample]>,
    ) -> Result<SignalScores, DetectError> {
        let x = self.stats.normalize(sample);
        let statistical = self.checker.check(sample, &self.stats);

        let cnn_score = match window {
            Some(w) => {
                let grid: Vec<FeatureVector> = w.iter().map(|s| self.stats.normalize(s)).collect();
                Some(self.cnn.predict(&grid)?)
            }
            None => None,
        };

        Ok(SignalScores {
            reconstruction_error: self.autoencoder.score(&x)?,
            isolation_score: self.forest.score(&x)?,
            max_z_score: statistical.max_z,
            statistical: statistical.is_anomaly,
            cnn_score,
        })
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    pub fn metrics(&self) -> &ModelMetrics {
        &self.metrics
    }
}

/// Clears the training flag when a cycle ends, even by panic.
struct TrainingFlag<'a>(&'a AtomicBool);

impl<'a> TrainingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for TrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The ensemble detector.
///
/// Share as `Arc<AnomalyEngine>`. Training builds a complete new
/// [`TrainedEnsemble`] off to the side and publishes it with one pointer
/// swap; inference keeps using the previous snapshot until then.
pub struct AnomalyEngine {
    config: EngineConfig,
    thresholds: FusionThresholds,
    snapshot: RwLock<Option<Arc<TrainedEnsemble>>>,
    /// Held for the whole cycle; serialises writers only.
    train_lock: Mutex<()>,
    /// Completed training cycles, bumped after the snapshot swap.
    cycles: AtomicU64,
    training: AtomicBool,
    windows: WindowRegistry,
}

impl AnomalyEngine {
    pub fn new(config: EngineConfig) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            thresholds: FusionThresholds::from(&config),
            windows: WindowRegistry::new(config.cnn.window_length),
            snapshot: RwLock::new(None),
            train_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
            training: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn snapshot(&self) -> Option<Arc<TrainedEnsemble>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn state(&self) -> EngineState {
        if self.training.load(Ordering::SeqCst) {
            EngineState::Training
        } else if self.is_ready() {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        }
    }

    pub fn metrics(&self) -> Option<ModelMetrics> {
        self.snapshot().map(|s| s.metrics.clone())
    }

    pub fn training_cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn tracked_entities(&self) -> Vec<String> {
        self.windows.entity_ids()
    }

    /// Run one full training cycle and publish the result.
    ///
    /// Blocking and CPU-heavy; async callers should use `spawn_blocking`.
    /// On failure the previous snapshot (if any) keeps serving.
    pub fn train(&self, samples: &[TelemetrySample]) -> Result<ModelMetrics, DetectError> {
        let _writer = lock(&self.train_lock);
        let cycle = self.cycles.load(Ordering::SeqCst);
        let _flag = TrainingFlag::raise(&self.training);

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(cycle)),
            None => StdRng::from_entropy(),
        };

        info!(samples = samples.len(), cycle = cycle + 1, "training cycle started");
        let ensemble = match TrainedEnsemble::build(samples, &self.config, &mut rng) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "training cycle failed, keeping previous models");
                return Err(e);
            }
        };

        let metrics = ensemble.metrics.clone();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(ensemble));
        self.cycles.store(cycle + 1, Ordering::SeqCst);

        info!(
            cycle = cycle + 1,
            accuracy = metrics.accuracy,
            f1 = metrics.f1_score,
            loss = metrics.training_loss,
            "training cycle complete"
        );
        Ok(metrics)
    }

    /// Push `sample` into the entity's window and run the ensemble.
    ///
    /// Fails with [`DetectError::ModelNotReady`] (without touching the
    /// window) until a training cycle has completed.
    pub fn detect_anomaly(&self, sample: &TelemetrySample, entity_id: &str) -> Result<AnomalyVerdict, DetectError> {
        if let Some(feature) = sample.first_non_finite() {
            return Err(DetectError::InvalidSample { index: 0, feature });
        }
        let ensemble = self.snapshot().ok_or(DetectError::ModelNotReady)?;

        let shared = self.windows.window(entity_id);
        let signals = {
            // held across push + classify for this entity only
            let mut window = lock(&shared);
            window.push(*sample);
            let full: Option<Vec<TelemetrySample>> = if window.is_full() {
                Some(window.samples().copied().collect())
            } else {
                None
            };
            ensemble.signals(sample, full.as_deref())?
        };

        let outcome = fusion::fuse(&signals, &self.thresholds);
        let (anomaly_type, severity) = fusion::classify(sample, outcome.is_anomaly, outcome.confidence);

        if outcome.is_anomaly {
            warn!(
                entity = entity_id,
                category = %anomaly_type,
                severity = %severity,
                score = outcome.combined_score,
                votes = outcome.votes.count(),
                "anomaly detected"
            );
        }

        Ok(AnomalyVerdict {
            entity_id: entity_id.to_string(),
            is_anomaly: outcome.is_anomaly,
            anomaly_score: outcome.combined_score,
            confidence: outcome.confidence,
            features: *sample,
            anomaly_type,
            severity,
            votes: outcome.votes,
            signals,
            detected_at: chrono::Utc::now(),
        })
    }
}
