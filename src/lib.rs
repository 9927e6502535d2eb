//! sentinelx -- streaming ensemble anomaly detection for satellite telemetry.
//!
//! This crate provides the detection engine (normalizer, statistical check,
//! autoencoder, isolation forest, time-series CNN, vote fusion) and the
//! service around it: SQLite storage, periodic retraining and an HTTP API.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod ml;
pub mod scheduler;
pub mod simulate;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::detect::engine::AnomalyEngine;

/// Start the sentinelx daemon: storage, bootstrap training, retraining loop
/// and API server.
pub async fn serve(config: Config) -> Result<()> {
    let service = &config.service;

    // 1. Initialize Storage
    tracing::info!(db_path = %service.db_path, "Initializing database");
    let pool = storage::open_pool(&service.db_path)?;

    // 2. Build the engine
    let engine = Arc::new(AnomalyEngine::new(config.engine.clone()).context("invalid engine configuration")?);

    // 3. Bootstrap on a synthetic corpus so detection is available before
    //    live telemetry accumulates
    if service.bootstrap_samples > 0 {
        let engine = Arc::clone(&engine);
        let pool = pool.clone();
        let n = service.bootstrap_samples;
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || -> Result<()> {
                let samples = telemetry::synthetic::generate_synthetic_training_data(n);
                let metrics = engine.train(&samples)?;
                storage::record_training_run(&pool, "bootstrap", &metrics)?;
                Ok(())
            })
            .await;
            match result {
                Ok(Ok(())) => tracing::info!(samples = n, "bootstrap training complete"),
                Ok(Err(e)) => tracing::error!("bootstrap training failed: {:#}", e),
                Err(e) => tracing::error!("bootstrap training task panicked: {}", e),
            }
        });
    }

    // 4. Start retraining loop (background task)
    let retrainer = scheduler::Retrainer::new(Arc::clone(&engine), pool.clone(), service.retrain_min_samples);
    let period = Duration::from_secs(service.retrain_interval_secs.max(1));
    tokio::spawn(async move {
        scheduler::run_retrain_loop(retrainer, period).await;
    });

    // 5. Start API Server
    let addr: std::net::SocketAddr = service
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", service.bind))?;
    let state = api::state::AppState::new(engine, pool, service);
    let app = api::router(state);

    tracing::info!(%addr, "sentinelx listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
