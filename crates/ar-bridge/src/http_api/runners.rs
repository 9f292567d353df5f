use std::sync::Arc;

use ar_engine::runners::HeartbeatInput;
use ar_engine::secret_wiring::WiringEntryInput;
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
pub(crate) struct HeartbeatRequest {
    runner_name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    capabilities: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTokenRequest {
    runner_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpsertWiringRequest {
    entries: Vec<WiringEntryDto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WiringEntryDto {
    secret_name: String,
    scope: String,
    status: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    last_verified_at: Option<i64>,
}

/// POST /api/projects/{project_id}/runners — heartbeat upsert.
pub(crate) async fn heartbeat(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let runner_id = state
        .engine
        .upsert_runner_heartbeat(
            identity.as_ref(),
            project_id,
            &req.runner_name,
            HeartbeatInput {
                reported_status: req.status,
                version: req.version,
                capabilities: req.capabilities,
            },
        )
        .await?;
    Ok(Json(serde_json::json!({"runner_id": runner_id})))
}

/// GET /api/projects/{project_id}/runners
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let runners = state.engine.list_runners(identity.as_ref(), project_id).await?;
    Ok(Json(runners))
}

/// POST /api/projects/{project_id}/runner-tokens — the plaintext appears in
/// this response and nowhere else, ever.
pub(crate) async fn create_token(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let issued = state
        .engine
        .create_runner_token(identity.as_ref(), project_id, &req.runner_name)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// POST /api/runner-tokens/{token_id}/revoke
pub(crate) async fn revoke_token(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(token_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    state.engine.revoke_runner_token(identity.as_ref(), token_id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/// GET /api/projects/{project_id}/runner-tokens
pub(crate) async fn list_tokens(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let tokens = state
        .engine
        .list_runner_tokens(identity.as_ref(), project_id)
        .await?;
    Ok(Json(tokens))
}

/// POST /api/projects/{project_id}/secret-wiring/{host_name}
pub(crate) async fn upsert_wiring(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((project_id, host_name)): Path<(Uuid, String)>,
    Json(req): Json<UpsertWiringRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let entries = req
        .entries
        .into_iter()
        .map(|e| WiringEntryInput {
            secret_name: e.secret_name,
            scope: e.scope,
            status: e.status,
            required: e.required,
            last_verified_at: e.last_verified_at,
        })
        .collect();
    let updated = state
        .engine
        .upsert_secret_wiring(identity.as_ref(), project_id, &host_name, entries)
        .await?;
    Ok(Json(serde_json::json!({"updated": updated})))
}

/// GET /api/projects/{project_id}/secret-wiring/{host_name}
pub(crate) async fn list_wiring(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((project_id, host_name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let wiring = state
        .engine
        .list_secret_wiring(identity.as_ref(), project_id, &host_name)
        .await?;
    Ok(Json(wiring))
}
