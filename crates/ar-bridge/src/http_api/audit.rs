use std::sync::Arc;

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
pub(crate) struct AppendRequest {
    #[serde(default)]
    project_id: Option<Uuid>,
    action: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// POST /api/audit
pub(crate) async fn append(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<AppendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    state
        .engine
        .append_audit(identity.as_ref(), req.project_id, &req.action, req.target, req.data)
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({"ok": true}))))
}

/// GET /api/projects/{project_id}/audit
pub(crate) async fn page(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let page = state
        .engine
        .page_audit_by_project(
            identity.as_ref(),
            project_id,
            page.cursor,
            page.num_items.unwrap_or(ar_engine::AUDIT_PAGE_CAP),
        )
        .await?;
    Ok(Json(page))
}
