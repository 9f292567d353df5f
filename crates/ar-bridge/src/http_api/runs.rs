use std::sync::Arc;

use ar_core::types::RunStatus;
use ar_engine::run_events::RunEventInput;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::PageQuery;
use crate::api_error::ApiError;
use crate::identity::identity_from_headers;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRunRequest {
    project_id: Uuid,
    kind: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetStatusRequest {
    status: RunStatus,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppendEventsRequest {
    events: Vec<EventDto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventDto {
    ts: i64,
    level: String,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    redacted: Option<bool>,
}

/// POST /api/runs
pub(crate) async fn create(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let run = state
        .engine
        .create_run(identity.as_ref(), req.project_id, &req.kind, req.title, req.host)
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({"run_id": run.id}))))
}

/// GET /api/runs/{run_id}
pub(crate) async fn get_one(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let run = state.engine.get_run_authorized(identity.as_ref(), run_id).await?;
    Ok(Json(run))
}

/// POST /api/runs/{run_id}/status
pub(crate) async fn set_status(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
    Json(req): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let run = state
        .engine
        .set_run_status(identity.as_ref(), run_id, req.status, req.error_message)
        .await?;
    Ok(Json(run))
}

/// GET /api/projects/{project_id}/runs
pub(crate) async fn page_by_project(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let page = state
        .engine
        .page_runs(
            identity.as_ref(),
            project_id,
            page.cursor,
            page.num_items.unwrap_or(ar_engine::RUNS_PAGE_CAP),
        )
        .await?;
    Ok(Json(page))
}

/// POST /api/runs/{run_id}/events
pub(crate) async fn append_events(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
    Json(req): Json<AppendEventsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let events = req
        .events
        .into_iter()
        .map(|e| RunEventInput {
            ts: e.ts,
            level: e.level,
            message: e.message,
            data: e.data,
            redacted: e.redacted,
        })
        .collect();
    let stored = state
        .engine
        .append_run_events(identity.as_ref(), run_id, events)
        .await?;
    Ok(Json(serde_json::json!({"stored": stored})))
}

/// GET /api/runs/{run_id}/events
pub(crate) async fn page_events(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let page = state
        .engine
        .page_run_events(
            identity.as_ref(),
            run_id,
            page.cursor,
            page.num_items.unwrap_or(ar_engine::RUN_EVENTS_PAGE_CAP),
        )
        .await?;
    Ok(Json(page))
}
