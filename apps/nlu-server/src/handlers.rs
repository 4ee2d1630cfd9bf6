//! Route handlers and the HTTP error mapping.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use nlu_core::RequestId;
use nlu_engine::{BatchItem, BatchRequest, NluError, ProcessRequest, RequestFailure};

use crate::app::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors surfaced to HTTP clients as `{ error_code, message, request_id }`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestFailure),

    #[error("malformed request body: {0}")]
    Malformed(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Request(failure) => match failure.error {
                NluError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                NluError::Overloaded(_) | NluError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Request(failure) => json!({
                "error_code": failure.code(),
                "message": failure.error.to_string(),
                "request_id": failure.request_id,
            }),
            ApiError::Malformed(message) => json!({
                "error_code": "INVALID_INPUT",
                "message": message,
                "request_id": null,
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub result: T,
    pub confidence_score: f64,
    pub processing_time: f64,
    pub model_version: String,
    pub request_id: RequestId,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub batch_id: RequestId,
    pub success_rate: f64,
    pub processing_time: f64,
    pub results: Vec<Envelope<BatchItem>>,
}

pub async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "Agent NLU",
        "version": env!("CARGO_PKG_VERSION"),
        "model_version": state.engine.model_version(),
        "status": "running"
    }))
}

pub async fn process(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<nlu_engine::ValidatedResult>>> {
    let Json(request) = payload?;
    let result = state.engine.process(request).await?;

    Ok(Json(Envelope {
        confidence_score: result.overall_confidence,
        processing_time: result.processing_time,
        model_version: state.engine.model_version().to_string(),
        request_id: result.request_id.clone(),
        result,
    }))
}

pub async fn process_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(request) = payload?;
    let outcome = state.engine.process_batch(request).await?;
    let model_version = state.engine.model_version().to_string();

    let results = outcome
        .items
        .into_iter()
        .map(|item| {
            let (confidence_score, processing_time, request_id) = match &item {
                BatchItem::Success(result) => (
                    result.overall_confidence,
                    result.processing_time,
                    result.request_id.clone(),
                ),
                BatchItem::Error(record) => (0.0, 0.0, record.request_id.clone()),
            };
            Envelope {
                result: item,
                confidence_score,
                processing_time,
                model_version: model_version.clone(),
                request_id,
            }
        })
        .collect();

    Ok(Json(BatchResponse {
        batch_id: outcome.batch_id,
        success_rate: outcome.success_rate,
        processing_time: outcome.processing_time,
        results,
    }))
}

pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.engine.health().await;
    if report.is_healthy() {
        (StatusCode::OK, Json(report)).into_response()
    } else {
        warn!(error = ?report.error, "Health probe failed");
        (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let mut body = state.engine.render_metrics();
    body.push_str(&state.http_metrics.render());

    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response()
}
