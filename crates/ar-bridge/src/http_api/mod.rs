//! Route table and shared handler plumbing.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::ApiState;

mod audit;
mod deletion;
mod internal;
mod jobs;
mod projects;
mod runners;
mod runs;

/// Assemble the full HTTP surface. Queries are `GET`, mutations `POST`;
/// `/internal/*` authenticates with runner tokens instead of user identity.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        // ---- projects -----------------------------------------------------
        .route("/api/projects", get(projects::list).post(projects::create))
        .route("/api/projects/{project_id}", get(projects::get_one))
        // ---- runs & run events -------------------------------------------
        .route("/api/projects/{project_id}/runs", get(runs::page_by_project))
        .route("/api/runs", post(runs::create))
        .route("/api/runs/{run_id}", get(runs::get_one))
        .route("/api/runs/{run_id}/status", post(runs::set_status))
        .route(
            "/api/runs/{run_id}/events",
            get(runs::page_events).post(runs::append_events),
        )
        // ---- runners, tokens, secret wiring ------------------------------
        .route(
            "/api/projects/{project_id}/runners",
            get(runners::list).post(runners::heartbeat),
        )
        .route(
            "/api/projects/{project_id}/runner-tokens",
            get(runners::list_tokens).post(runners::create_token),
        )
        .route("/api/runner-tokens/{token_id}/revoke", post(runners::revoke_token))
        .route(
            "/api/projects/{project_id}/secret-wiring/{host_name}",
            get(runners::list_wiring).post(runners::upsert_wiring),
        )
        // ---- runner-command queue ----------------------------------------
        .route("/api/projects/{project_id}/runner-jobs", post(jobs::enqueue))
        .route(
            "/api/projects/{project_id}/runner-jobs/{job_id}/finalize",
            post(jobs::finalize),
        )
        // ---- project deletion --------------------------------------------
        .route("/api/projects/{project_id}/deletion/start", post(deletion::start))
        .route("/api/projects/{project_id}/deletion/confirm", post(deletion::confirm))
        .route("/api/deletion-jobs/{job_id}", get(deletion::status))
        // ---- audit --------------------------------------------------------
        .route("/api/audit", post(audit::append))
        .route("/api/projects/{project_id}/audit", get(audit::page))
        // ---- runner-facing internal surface ------------------------------
        .route("/internal/runner/jobs/poll", post(internal::poll_job))
        .route("/internal/runner/jobs/{job_id}/result", post(internal::take_result))
        .route("/internal/runner-tokens/lookup", post(internal::lookup_token))
        .route("/internal/runner-tokens/{token_id}/touch", post(internal::touch_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

/// Pagination query shared by every paged listing.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub num_items: Option<usize>,
}
