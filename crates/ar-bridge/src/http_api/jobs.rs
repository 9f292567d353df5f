use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::identity::identity_from_headers;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct EnqueueRequest {
    target_runner_id: Uuid,
    kind: String,
    #[serde(default)]
    payload_meta: Option<serde_json::Value>,
    #[serde(default)]
    sealed_input_keys: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FinalizeRequest {
    kind: String,
    sealed_input_b64: String,
    sealed_input_alg: String,
    sealed_input_key_id: String,
}

/// POST /api/projects/{project_id}/runner-jobs — reserve a job and echo the
/// runner's advertised sealing key material.
pub(crate) async fn enqueue(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(req): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let receipt = state
        .engine
        .enqueue_runner_command(
            identity.as_ref(),
            project_id,
            req.target_runner_id,
            &req.kind,
            req.payload_meta,
            req.sealed_input_keys,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /api/projects/{project_id}/runner-jobs/{job_id}/finalize — attach
/// the ciphertext and open the job for pickup.
pub(crate) async fn finalize(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((project_id, job_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<FinalizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    state
        .engine
        .finalize_runner_command(
            identity.as_ref(),
            project_id,
            job_id,
            &req.kind,
            &req.sealed_input_b64,
            &req.sealed_input_alg,
            &req.sealed_input_key_id,
        )
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}
