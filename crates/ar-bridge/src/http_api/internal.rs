//! Runner-facing internal endpoints.
//!
//! These authenticate with `X-Runner-Token` (the plaintext issued once at
//! token creation; validated by digest, expiry, and revocation — the
//! comparison happens on sha-256 hex digests, so lookup timing reveals
//! nothing about stored material). The `/internal` prefix is expected to be
//! network-restricted to the runner fleet and edge services in deployment.

use std::sync::Arc;

use ar_core::CoreError;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct LookupRequest {
    token_hash: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResultRequest {
    result_json: serde_json::Value,
}

fn runner_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-runner-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError(CoreError::unauthorized("missing runner token")))
}

/// POST /internal/runner/jobs/poll — claim the next queued job for the
/// authenticated runner. 204 when the queue is empty.
pub(crate) async fn poll_job(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let runner = state.engine.authenticate_runner(runner_token(&headers)?).await?;
    match state.engine.poll_runner_job(&runner).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /internal/runner/jobs/{job_id}/result — `take_run_result`.
pub(crate) async fn take_result(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
    Json(req): Json<ResultRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let runner = state.engine.authenticate_runner(runner_token(&headers)?).await?;
    let receipt = state
        .engine
        .take_run_result(&runner, job_id, req.result_json)
        .await?;
    Ok(Json(receipt))
}

/// POST /internal/runner-tokens/lookup — digest lookup for edge services.
pub(crate) async fn lookup_token(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LookupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state.engine.lookup_runner_token(&req.token_hash).await? {
        Some(lookup) => Ok(Json(lookup).into_response()),
        None => Err(ApiError(CoreError::not_found("token not found"))),
    }
}

/// POST /internal/runner-tokens/{token_id}/touch — record use.
pub(crate) async fn touch_token(
    State(state): State<Arc<ApiState>>,
    Path(token_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.touch_runner_token(token_id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}
