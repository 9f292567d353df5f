use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::identity::identity_from_headers;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct ConfirmRequest {
    token: String,
    confirmation: String,
}

/// POST /api/projects/{project_id}/deletion/start — issue the one-shot
/// confirmation token.
pub(crate) async fn start(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let receipt = state.engine.delete_start(identity.as_ref(), project_id).await?;
    Ok(Json(receipt))
}

/// POST /api/projects/{project_id}/deletion/confirm — verify and launch the
/// erasure machine.
pub(crate) async fn confirm(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(req): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let job_id = state
        .engine
        .delete_confirm(identity.as_ref(), project_id, &req.token, &req.confirmation)
        .await?;
    Ok(Json(serde_json::json!({"job_id": job_id})))
}

/// GET /api/deletion-jobs/{job_id} — live machine state.
pub(crate) async fn status(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let status = state.engine.delete_status(identity.as_ref(), job_id).await?;
    Ok(Json(status))
}
