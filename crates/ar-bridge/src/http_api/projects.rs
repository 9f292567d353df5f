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
pub(crate) struct CreateProjectRequest {
    name: String,
}

/// POST /api/projects — create a project owned by the caller.
pub(crate) async fn create(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let project = state.engine.create_project(identity.as_ref(), &req.name).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects — projects visible to the caller.
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let projects = state.engine.list_projects(identity.as_ref()).await?;
    Ok(Json(projects))
}

/// GET /api/projects/{project_id}
pub(crate) async fn get_one(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from_headers(&headers);
    let (project, role) = state.engine.get_project(identity.as_ref(), project_id).await?;
    Ok(Json(serde_json::json!({"project": project, "role": role})))
}
