use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::detect::engine::AnomalyEngine;
use crate::detect::ModelMetrics;
use crate::storage::{self, Pool};

/// What one retraining check did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RetrainOutcome {
    Skipped { buffered: usize, needed: usize },
    Trained { samples: usize, metrics: ModelMetrics },
    Failed { samples: usize, error: String },
}

/// Trains the engine on the telemetry buffer once enough rows accumulate.
#[derive(Clone)]
pub struct Retrainer {
    engine: Arc<AnomalyEngine>,
    pool: Pool,
    min_samples: usize,
}

impl Retrainer {
    pub fn new(engine: Arc<AnomalyEngine>, pool: Pool, min_samples: usize) -> Self {
        Self {
            engine,
            pool,
            min_samples,
        }
    }

    /// Check the buffer and, if it is large enough, run one training cycle
    /// off the async runtime. Consumed rows are discarded only after a
    /// successful cycle; a failed cycle leaves them for the next attempt.
    pub async fn run_once(&self) -> Result<RetrainOutcome> {
        let engine = Arc::clone(&self.engine);
        let pool = self.pool.clone();
        let min_samples = self.min_samples;

        tokio::task::spawn_blocking(move || -> Result<RetrainOutcome> {
            let buffered = storage::buffered_count(&pool)?;
            if buffered < min_samples {
                return Ok(RetrainOutcome::Skipped {
                    buffered,
                    needed: min_samples,
                });
            }

            let batch = storage::load_buffered(&pool)?;
            let samples = batch.samples.len();
            match engine.train(&batch.samples) {
                Ok(metrics) => {
                    storage::record_training_run(&pool, "scheduled", &metrics)?;
                    if let Some(last_id) = batch.last_id {
                        storage::discard_buffered_through(&pool, last_id)?;
                    }
                    Ok(RetrainOutcome::Trained { samples, metrics })
                }
                Err(e) => Ok(RetrainOutcome::Failed {
                    samples,
                    error: e.to_string(),
                }),
            }
        })
        .await
        .context("retraining task panicked")?
    }
}

/// Main retraining loop. The first check happens one `period` after start.
pub async fn run_retrain_loop(retrainer: Retrainer, period: Duration) {
    info!(period_secs = period.as_secs(), "retraining loop started");

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        interval.tick().await;

        match retrainer.run_once().await {
            Ok(RetrainOutcome::Skipped { buffered, needed }) => {
                debug!(buffered, needed, "not enough buffered telemetry, skipping retrain");
            }
            Ok(RetrainOutcome::Trained { samples, metrics }) => {
                info!(samples, accuracy = metrics.accuracy, "scheduled retrain complete");
            }
            Ok(RetrainOutcome::Failed { samples, error }) => {
                warn!(samples, %error, "scheduled retrain failed, previous models still serving");
            }
            Err(e) => {
                error!("retraining check failed: {:#}", e);
            }
        }
    }
}
