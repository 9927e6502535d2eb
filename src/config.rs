//! TOML configuration for the sentinelx engine and service.
//!
//! Layered model: `SENTINELX_CONFIG` env path, then
//! `/etc/sentinelx/sentinelx.toml`, then compiled-in defaults. Every section
//! is optional.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::DetectError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the sentinelx process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .engine
            .validate()
            .with_context(|| format!("invalid engine section in {}", path.display()))?;
        info!(path = %path.display(), "loaded sentinelx configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `SENTINELX_CONFIG` environment variable.
    /// 2. `/etc/sentinelx/sentinelx.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("SENTINELX_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SENTINELX_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/sentinelx/sentinelx.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Hyperparameters and decision thresholds for the detection ensemble.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixes the random source of every training cycle when set.
    pub seed: Option<u64>,
    pub normalizer: NormalizerConfig,
    pub autoencoder: AutoencoderConfig,
    pub forest: ForestConfig,
    pub cnn: CnnConfig,
    pub statistical: StatisticalConfig,
    pub fusion: FusionConfig,
}

impl EngineConfig {
    /// Reject configurations no engine can be built from.
    pub fn validate(&self) -> Result<(), DetectError> {
        fn invalid(msg: &str) -> Result<(), DetectError> {
            Err(DetectError::InvalidConfig(msg.to_string()))
        }

        if !(self.normalizer.epsilon > 0.0) {
            return invalid("normalizer.epsilon must be positive");
        }
        if self.autoencoder.epochs == 0 || self.autoencoder.batch_size == 0 {
            return invalid("autoencoder.epochs and autoencoder.batch_size must be at least 1");
        }
        if !(0.0..1.0).contains(&self.autoencoder.validation_split) {
            return invalid("autoencoder.validation_split must be in [0, 1)");
        }
        if !(self.autoencoder.learning_rate > 0.0) || !(self.cnn.learning_rate > 0.0) {
            return invalid("learning rates must be positive");
        }
        if self.forest.num_trees == 0 || self.forest.subsample_size == 0 {
            return invalid("forest.num_trees and forest.subsample_size must be at least 1");
        }
        if self.cnn.window_length < 4 {
            return invalid("cnn.window_length must be at least 4 (two pooling stages)");
        }
        if self.cnn.epochs == 0 || self.cnn.batch_size == 0 || self.cnn.max_training_windows == 0 {
            return invalid("cnn.epochs, cnn.batch_size and cnn.max_training_windows must be at least 1");
        }
        if !(0.0..1.0).contains(&self.cnn.dropout) {
            return invalid("cnn.dropout must be in [0, 1)");
        }
        let thresholds = [
            self.autoencoder.threshold,
            self.forest.threshold,
            self.cnn.threshold,
            self.statistical.z_threshold,
        ];
        if thresholds.iter().any(|t| !(*t > 0.0)) {
            return invalid("decision thresholds must be positive");
        }
        if self.fusion.min_votes == 0 || self.fusion.min_votes > 4 {
            return invalid("fusion.min_votes must be between 1 and 4");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Floor applied to every standard deviation before dividing.
    pub epsilon: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { epsilon: 1e-8 }
    }
}

/// Reconstruction model training regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoencoderConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of the corpus held out for validation loss and metrics.
    pub validation_split: f64,
    /// Reconstruction MSE above which the model votes "anomaly".
    pub threshold: f64,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.2,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub num_trees: usize,
    pub subsample_size: usize,
    /// Isolation score above which the forest votes "anomaly".
    pub threshold: f64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            subsample_size: 256,
            threshold: 0.6,
        }
    }
}

/// Time-series classifier shape and training regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnConfig {
    /// Samples per entity window; also the classifier's input length.
    pub window_length: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub dropout: f64,
    pub threshold: f64,
    /// Upper bound on windows cut from one training corpus.
    pub max_training_windows: usize,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            window_length: 10,
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            dropout: 0.2,
            threshold: 0.5,
            max_training_windows: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalConfig {
    pub z_threshold: f64,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self { z_threshold: 3.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Number of agreeing sub-model votes that makes a verdict anomalous.
    pub min_votes: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { min_votes: 2 }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// HTTP service, storage and retraining configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: String,
    pub db_path: String,
    /// Seconds between background retraining checks.
    pub retrain_interval_secs: u64,
    /// Buffered telemetry rows required before a retraining cycle runs.
    pub retrain_min_samples: usize,
    /// Synthetic corpus size used to train at startup (0 disables).
    pub bootstrap_samples: usize,
    /// Default page size for anomaly listings.
    pub recent_anomaly_limit: usize,
    /// Largest `{"synthetic": n}` corpus `POST /train` will generate.
    pub max_synthetic_samples: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/sentinelx.db".to_string(),
            retrain_interval_secs: 3600,
            retrain_min_samples: 100,
            bootstrap_samples: 2000,
            recent_anomaly_limit: 50,
            max_synthetic_samples: 50_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
