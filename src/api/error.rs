use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::detect::DetectError;

/// Handler error, rendered as `{"error": {"kind", "message"}}`.
#[derive(Debug)]
pub enum ApiError {
    Detect(DetectError),
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Detect(e) => {
                let status = match e {
                    DetectError::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
                    DetectError::InsufficientData { .. } | DetectError::InvalidSample { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Detect(e) => e.to_string(),
            ApiError::BadRequest(m) | ApiError::NotFound(m) => m.clone(),
            ApiError::Internal(e) => format!("{e:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(kind, error = %self.message(), "request failed");
        }
        let body = json!({ "error": { "kind": kind, "message": self.message() } });
        (status, Json(body)).into_response()
    }
}

impl From<DetectError> for ApiError {
    fn from(e: DetectError) -> Self {
        ApiError::Detect(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

// Extractor rejections are client errors and use the same envelope.
impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(anyhow::Error::new(e).context("blocking task failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Detect(DetectError::ModelNotReady), StatusCode::SERVICE_UNAVAILABLE),
            (
                ApiError::Detect(DetectError::InsufficientData { needed: 1, have: 0 }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::Detect(DetectError::InvalidSample {
                    index: 0,
                    feature: "power",
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::Detect(DetectError::Diverged { model: "cnn", epoch: 1 }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
