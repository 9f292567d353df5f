//! HTTP surface integration tests: envelope behavior over real routes.

use std::sync::Arc;

use ar_bridge::{build_router, ApiState};
use ar_engine::Engine;
use ar_store::StoreDb;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app(auth_disabled: bool) -> Router {
    let store = StoreDb::open_in_memory().await.unwrap();
    let engine = Engine::new(store, auth_disabled);
    build_router(Arc::new(ApiState::new(engine)))
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(subject) = bearer {
        builder = builder.header("authorization", format!("Bearer {subject}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(subject) = bearer {
        builder = builder.header("authorization", format!("Bearer {subject}"));
    }
    builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_needs_no_identity() {
    let app = test_app(false).await;
    let response = app.oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mutations_without_identity_are_401() {
    let app = test_app(false).await;
    let response = app
        .oneshot(post("/api/projects", None, json!({"name": "fleet"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn project_create_and_get_roundtrip() {
    let app = test_app(false).await;

    let response = app
        .clone()
        .oneshot(post("/api/projects", Some("alice"), json!({"name": "fleet-a"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let project = body_json(response).await;
    let project_id = project["id"].as_str().unwrap().to_string();
    assert_eq!(project["status"], "creating");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/projects/{project_id}"), Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["role"], "admin");

    // Strangers get 403.
    let response = app
        .oneshot(get(&format!("/api/projects/{project_id}"), Some("mallory")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_project_is_404() {
    let app = test_app(false).await;
    let response = app
        .oneshot(get(
            "/api/projects/00000000-0000-4000-8000-000000000000",
            Some("alice"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn run_lifecycle_over_http() {
    let app = test_app(false).await;
    let project = body_json(
        app.clone()
            .oneshot(post("/api/projects", Some("alice"), json!({"name": "fleet-a"})))
            .await
            .unwrap(),
    )
    .await;
    let project_id = project["id"].as_str().unwrap();

    let created = body_json(
        app.clone()
            .oneshot(post(
                "/api/runs",
                Some("alice"),
                json!({"project_id": project_id, "kind": "bootstrap", "title": "boot"}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let run_id = created["run_id"].as_str().unwrap();

    // Append events, then read them back.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/runs/{run_id}/events"),
            Some("alice"),
            json!({"events": [
                {"ts": 1, "level": "info", "message": "starting"},
                {"ts": 2, "level": "info", "message": "   "},
            ]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["stored"], 1);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/runs/{run_id}/status"),
            Some("alice"),
            json!({"status": "succeeded"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["status"], "succeeded");
    assert!(run["finished_at"].is_i64());

    let events = body_json(
        app.oneshot(get(&format!("/api/runs/{run_id}/events"), Some("alice")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(events["items"].as_array().unwrap().len(), 1);
    assert_eq!(events["is_done"], true);
}

#[tokio::test]
async fn rate_limited_mutations_return_429_with_retry_after() {
    let app = test_app(true).await;
    // projects.create is capped at 10/min for a user.
    for i in 0..10 {
        let response = app
            .clone()
            .oneshot(post("/api/projects", None, json!({"name": format!("p{i}")})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let response = app
        .oneshot(post("/api/projects", None, json!({"name": "p11"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = body_json(response).await;
    assert_eq!(body["code"], "rate_limited");
    assert!(body["data"]["retry_at"].is_i64());
}

#[tokio::test]
async fn deletion_flow_over_http() {
    let app = test_app(true).await;
    let project = body_json(
        app.clone()
            .oneshot(post("/api/projects", None, json!({"name": "orca"})))
            .await
            .unwrap(),
    )
    .await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let receipt = body_json(
        app.clone()
            .oneshot(post(
                &format!("/api/projects/{project_id}/deletion/start"),
                None,
                json!({}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let token = receipt["token"].as_str().unwrap().to_string();

    // Wrong confirmation text: 409, no job.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/projects/{project_id}/deletion/confirm"),
            None,
            json!({"token": token, "confirmation": "delete wrong"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/projects/{project_id}/deletion/confirm"),
            None,
            json!({"token": token, "confirmation": "delete orca"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap();

    let status = body_json(
        app.oneshot(get(&format!("/api/deletion-jobs/{job_id}"), None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["status"], "pending");
    assert_eq!(status["stage"], "run_events");
    assert_eq!(status["processed"], 0);
}

#[tokio::test]
async fn runner_internal_surface_requires_a_token() {
    let app = test_app(true).await;
    let response = app
        .clone()
        .oneshot(post("/internal/runner/jobs/poll", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn runner_poll_claims_finalized_jobs() {
    let app = test_app(true).await;
    let project = body_json(
        app.clone()
            .oneshot(post("/api/projects", None, json!({"name": "fleet-a"})))
            .await
            .unwrap(),
    )
    .await;
    let project_id = project["id"].as_str().unwrap().to_string();

    // Register a sealing-capable runner and issue its token.
    let heartbeat = body_json(
        app.clone()
            .oneshot(post(
                &format!("/api/projects/{project_id}/runners"),
                None,
                json!({
                    "runner_name": "r1",
                    "capabilities": {"sealing": {
                        "alg": "rsa-oaep-256", "key_id": "k1", "pub_spki_b64": "AAA"
                    }}
                }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let runner_id = heartbeat["runner_id"].as_str().unwrap().to_string();

    let issued = body_json(
        app.clone()
            .oneshot(post(
                &format!("/api/projects/{project_id}/runner-tokens"),
                None,
                json!({"runner_name": "r1"}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let runner_token = issued["token"].as_str().unwrap().to_string();

    // Enqueue + finalize a sealed command.
    let receipt = body_json(
        app.clone()
            .oneshot(post(
                &format!("/api/projects/{project_id}/runner-jobs"),
                None,
                json!({
                    "target_runner_id": runner_id,
                    "kind": "secrets.write",
                    "sealed_input_keys": ["env_file"]
                }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let job_id = receipt["job_id"].as_str().unwrap().to_string();
    assert_eq!(receipt["sealing"]["key_id"], "k1");

    app.clone()
        .oneshot(post(
            &format!("/api/projects/{project_id}/runner-jobs/{job_id}/finalize"),
            None,
            json!({
                "kind": "secrets.write",
                "sealed_input_b64": "c2VhbGVk",
                "sealed_input_alg": "rsa-oaep-256",
                "sealed_input_key_id": "k1"
            }),
        ))
        .await
        .unwrap();

    // Runner polls with its token and receives the sealed job.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/internal/runner/jobs/poll")
                .header("x-runner-token", &runner_token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["id"].as_str().unwrap(), job_id);
    assert_eq!(job["sealed_input_b64"], "c2VhbGVk");

    // And reports its result.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/internal/runner/jobs/{job_id}/result"))
                .header("content-type", "application/json")
                .header("x-runner-token", &runner_token)
                .body(Body::from(
                    serde_json::to_vec(&json!({"result_json": {"ok": true}})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body_json(response).await;
    assert_eq!(receipt["status"], "succeeded");
}
