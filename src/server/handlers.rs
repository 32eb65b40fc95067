//! Health, info and predict handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{debug, error, info};
use serde::Serialize;
use serde_json::{Value, json};

use super::error::ApiError;
use super::state::{AppState, ResponseMode};
use crate::domain::JobRequest;
use crate::publish::content_type_for;

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct InfoResponse {
    service: &'static str,
    version: &'static str,
    ready: bool,
}

pub(super) async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.gate.is_ready() {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(HealthResponse { status: "not ready" }))
    }
}

pub(super) async fn info_route(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        ready: state.gate.is_ready(),
    })
}

pub(super) async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    if !state.gate.is_ready() {
        return Err(ApiError::NotReady);
    }

    let body: Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
    let job = parse_instances(body)?;

    let permit = Arc::clone(&state.slots)
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Internal("job slots closed".to_string()))?;

    // The run owns its permit so a client disconnect does not abandon it.
    let runner = Arc::clone(&state.runner);
    let handle = tokio::spawn(async move {
        let _permit = permit;
        runner.run(job).await
    });
    let outcome = handle
        .await
        .map_err(|e| ApiError::Internal(format!("run task failed: {}", e)))?
        .inspect_err(|e| error!("Predict run failed: {}", e))?;

    let path = outcome.snapshot.path();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read {}: {}", path.display(), e)))?;
    info!("Returning {} ({} bytes) for {}", path.display(), bytes.len(), outcome.job_id);

    Ok(match state.response_mode {
        ResponseMode::Json => Json(json!({
            "predictions": [{ "image_bytes": { "b64": STANDARD.encode(&bytes) } }]
        }))
        .into_response(),
        ResponseMode::File => ([(header::CONTENT_TYPE, content_type_for(path))], bytes).into_response(),
    })
}

/// Extract the job from a predict body.
///
/// `instances` may be a single job object or a list of them; only the first
/// list element is used.
pub fn parse_instances(body: Value) -> Result<JobRequest, ApiError> {
    let Value::Object(mut body) = body else {
        return Err(ApiError::BadRequest("request body must be a JSON object".to_string()));
    };
    let instances = body
        .remove("instances")
        .ok_or_else(|| ApiError::BadRequest("missing `instances` field".to_string()))?;

    let first = match instances {
        Value::Array(items) => {
            if items.len() > 1 {
                debug!("Ignoring {} extra instances", items.len() - 1);
            }
            items
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::BadRequest("`instances` is empty".to_string()))?
        }
        other => other,
    };

    Ok(JobRequest::from_value(first)?)
}
