//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use sentinelx::api::state::AppState;
use sentinelx::config::{EngineConfig, ServiceConfig};
use sentinelx::detect::engine::AnomalyEngine;
use sentinelx::storage;
use sentinelx::telemetry::TelemetrySample;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig {
        seed: Some(17),
        ..EngineConfig::default()
    };
    config.autoencoder.epochs = 5;
    config.forest.num_trees = 20;
    config.cnn.epochs = 1;
    config.cnn.max_training_windows = 32;
    config
}

fn test_app(dir: &tempfile::TempDir) -> Router {
    let pool = storage::open_pool(dir.path().join("api.db").to_str().unwrap()).unwrap();
    let engine = Arc::new(AnomalyEngine::new(fast_config()).unwrap());
    let service = ServiceConfig {
        recent_anomaly_limit: 20,
        max_synthetic_samples: 1_000,
        ..ServiceConfig::default()
    };
    sentinelx::api::router(AppState::new(engine, pool, &service))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call_raw(app, method, uri, body.map(|b| b.to_string())).await
}

async fn call_raw(app: &Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);
    let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_detect_before_training_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/detect",
        Some(json!({ "entityId": "sat-001", "telemetry": TelemetrySample::nominal(0) })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "model_not_ready");

    let (_, status_body) = call(&app, "GET", "/api/v1/status", None).await;
    assert_eq!(status_body["data"]["ready"], false);
    assert_eq!(status_body["data"]["state"], "uninitialized");
}

#[tokio::test]
async fn test_train_then_detect() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let (status, body) = call(&app, "POST", "/api/v1/train", Some(json!({ "synthetic": 300 }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["samplesProcessed"], 330);

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/detect",
        Some(json!({ "entityId": "sat-001", "telemetry": TelemetrySample::nominal(0) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["entityId"], "sat-001");
    assert!(body["data"]["confidence"].as_u64().unwrap() <= 100);
    // timestamp 0 is replaced by the receive time
    assert!(body["data"]["features"]["timestamp"].as_i64().unwrap() > 0);

    let (_, status_body) = call(&app, "GET", "/api/v1/status", None).await;
    assert_eq!(status_body["data"]["ready"], true);
    assert_eq!(status_body["data"]["trainingCycles"], 1);
    assert_eq!(status_body["data"]["bufferedSamples"], 1);
    assert_eq!(status_body["data"]["trackedEntities"], json!(["sat-001"]));

    let (status, runs) = call(&app, "GET", "/api/v1/training/runs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs["meta"]["total"], 1);
    assert_eq!(runs["data"][0]["origin"], "api");
}

#[tokio::test]
async fn test_train_rejects_ambiguous_body() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let (status, body) = call(&app, "POST", "/api/v1/train", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "bad_request");

    let (status, _) = call(&app, "POST", "/api/v1/train", Some(json!({ "samples": [] }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_manual_alert_and_flag() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/alerts",
        Some(json!({
            "entityId": "sat-009",
            "anomalyType": "Thermal Anomaly",
            "severity": "high",
            "description": "operator report"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["manual"], true);

    let (status, list) = call(&app, "GET", "/api/v1/anomalies", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["meta"]["total"], 1);
    assert_eq!(list["data"][0]["id"], id.as_str());
    assert!(list["meta"]["threatScore"].as_f64().unwrap() > 0.0);

    let (status, flagged) = call(&app, "POST", &format!("/api/v1/anomalies/{id}/flag"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flagged["data"]["flagged"], true);

    let missing = uuid::Uuid::new_v4();
    let (status, body) = call(&app, "POST", &format!("/api/v1/anomalies/{missing}/flag"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/alerts",
        Some(json!({ "entityId": " ", "anomalyType": "x", "severity": "low", "description": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);
    let (status, body) = call(&app, "GET", "/api/v2/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("/api/v2/nothing"));
}

fn assert_bad_request(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["kind"], "bad_request");
    assert!(!body["error"]["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_requests_use_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    // missing field
    let (status, body) = call(&app, "POST", "/api/v1/detect", Some(json!({ "entityId": "x" }))).await;
    assert_bad_request(status, &body);

    // not JSON at all
    let (status, body) = call_raw(&app, "POST", "/api/v1/detect", Some("not json".to_string())).await;
    assert_bad_request(status, &body);

    // wrong type
    let (status, body) = call(&app, "POST", "/api/v1/train", Some(json!({ "synthetic": "lots" }))).await;
    assert_bad_request(status, &body);

    let (status, body) = call(&app, "POST", "/api/v1/anomalies/not-a-uuid/flag", None).await;
    assert_bad_request(status, &body);

    let (status, body) = call(&app, "GET", "/api/v1/anomalies?limit=-3", None).await;
    assert_bad_request(status, &body);
}

#[tokio::test]
async fn test_synthetic_corpus_size_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    for n in [0u64, 1_001, 1_000_000_000] {
        let (status, body) = call(&app, "POST", "/api/v1/train", Some(json!({ "synthetic": n }))).await;
        assert_bad_request(status, &body);
    }

    let (_, status_body) = call(&app, "GET", "/api/v1/status", None).await;
    assert_eq!(status_body["data"]["trainingCycles"], 0);
}
