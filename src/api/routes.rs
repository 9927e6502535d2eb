//! API route definitions.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::state::AppState;
use super::ApiError;
use crate::detect::incident::ManualAlert;
use crate::storage;
use crate::telemetry::synthetic::generate_synthetic_training_data;
use crate::telemetry::TelemetrySample;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/train", post(train))
        .route("/training/runs", get(training_runs))
        .route("/detect", post(detect))
        .route("/anomalies", get(list_anomalies))
        .route("/anomalies/{id}/flag", post(flag_anomaly))
        .route("/alerts", post(create_alert))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let anomalies = state.anomalies.clone();
    let (threat_score, buffered) = tokio::task::spawn_blocking(move || -> anyhow::Result<(f64, usize)> {
        Ok((anomalies.threat_score()?, storage::buffered_count(&pool)?))
    })
    .await??;

    let engine = &state.engine;
    Ok(Json(json!({
        "data": {
            "ready": engine.is_ready(),
            "state": engine.state(),
            "trainingCycles": engine.training_cycles(),
            "metrics": engine.metrics(),
            "threatScore": threat_score,
            "trackedEntities": engine.tracked_entities(),
            "bufferedSamples": buffered
        },
        "meta": meta()
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainRequest {
    #[serde(default)]
    samples: Option<Vec<TelemetrySample>>,
    /// Train on a synthetic corpus of this many nominal samples instead.
    #[serde(default)]
    synthetic: Option<usize>,
}

enum CorpusSource {
    Provided(Vec<TelemetrySample>),
    Synthetic(usize),
}

async fn train(
    State(state): State<AppState>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let source = match (req.samples, req.synthetic) {
        (Some(samples), None) => CorpusSource::Provided(samples),
        (None, Some(n)) if n == 0 || n > state.max_synthetic => {
            return Err(ApiError::BadRequest(format!(
                "`synthetic` must be between 1 and {}",
                state.max_synthetic
            )))
        }
        (None, Some(n)) => CorpusSource::Synthetic(n),
        _ => {
            return Err(ApiError::BadRequest(
                "provide exactly one of `samples` or `synthetic`".to_string(),
            ))
        }
    };

    let engine = state.engine.clone();
    let pool = state.pool.clone();
    let metrics = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let samples = match source {
            CorpusSource::Provided(samples) => samples,
            CorpusSource::Synthetic(n) => generate_synthetic_training_data(n),
        };
        let metrics = engine.train(&samples)?;
        storage::record_training_run(&pool, "api", &metrics)?;
        Ok(metrics)
    })
    .await??;

    Ok(Json(json!({ "data": metrics, "meta": meta() })))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn training_runs(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(state.recent_limit);
    let pool = state.pool.clone();
    let runs = tokio::task::spawn_blocking(move || storage::recent_training_runs(&pool, limit)).await??;
    Ok(Json(json!({ "data": runs, "meta": { "total": runs.len() } })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest {
    entity_id: String,
    telemetry: TelemetrySample,
}

async fn detect(
    State(state): State<AppState>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let mut sample = req.telemetry;
    if sample.timestamp == 0 {
        sample.timestamp = chrono::Utc::now().timestamp_millis();
    }

    let engine = state.engine.clone();
    let pool = state.pool.clone();
    let anomalies = state.anomalies.clone();
    let entity_id = req.entity_id;

    let (verdict, anomaly_id) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let verdict = engine.detect_anomaly(&sample, &entity_id)?;
        storage::buffer_telemetry(&pool, &entity_id, &sample)?;
        let anomaly_id = if verdict.is_anomaly {
            Some(anomalies.record_verdict(&verdict)?)
        } else {
            None
        };
        Ok((verdict, anomaly_id))
    })
    .await??;

    Ok(Json(json!({
        "data": verdict,
        "meta": { "anomalyId": anomaly_id }
    })))
}

async fn list_anomalies(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(state.recent_limit);
    let anomalies = state.anomalies.clone();
    let (records, threat_score) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        Ok((anomalies.list_recent(limit)?, anomalies.threat_score()?))
    })
    .await??;

    Ok(Json(json!({
        "data": records,
        "meta": { "total": records.len(), "threatScore": threat_score }
    })))
}

async fn flag_anomaly(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let anomalies = state.anomalies.clone();
    let record = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        if anomalies.flag(id)? {
            anomalies.get(id)
        } else {
            Ok(None)
        }
    })
    .await??;

    match record {
        Some(record) => Ok(Json(json!({ "data": record, "meta": meta() }))),
        None => Err(ApiError::NotFound(format!("no anomaly with id {id}"))),
    }
}

async fn create_alert(
    State(state): State<AppState>,
    payload: Result<Json<ManualAlert>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(alert) = payload?;
    if alert.entity_id.trim().is_empty() || alert.anomaly_type.trim().is_empty() {
        return Err(ApiError::BadRequest("entityId and anomalyType are required".to_string()));
    }

    let anomalies = state.anomalies.clone();
    let record = tokio::task::spawn_blocking(move || anomalies.record_manual(&alert)).await??;
    tracing::warn!(
        entity = %record.entity_id,
        category = %record.anomaly_type,
        severity = %record.severity,
        "manual alert raised"
    );

    Ok((StatusCode::CREATED, Json(json!({ "data": record, "meta": meta() }))))
}
