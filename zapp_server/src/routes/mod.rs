//! HTTP routes: webhook, build API, repository API.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ZappConfig;
use crate::error::BuildError;
use crate::models::repository::{NewRepository, Repository};
use crate::services::executor::Orchestrator;
use crate::store::BuildStore;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct ZappRouterState {
    pub store: Arc<dyn BuildStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: ZappConfig,
}

/// Build the server's Axum router.
pub fn router(state: ZappRouterState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Build API
        .route("/api/builds", get(list_builds_handler))
        .route("/api/builds/trigger", post(trigger_build_handler))
        .route("/api/builds/{build_id}", get(get_build))
        .route("/api/builds/{build_id}/log", get(get_build_log))
        .route("/api/builds/{build_id}/cancel", post(cancel_build))
        // Repository API
        .route(
            "/api/repositories",
            get(list_repositories).post(create_repository),
        )
        .route(
            "/api/repositories/{repository_id}/latest",
            get(get_latest_build),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

async fn health(State(state): State<ZappRouterState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "builds_in_flight": state.orchestrator.in_flight_count(),
    }))
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<ZappRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(
        &state.config,
        state.store.as_ref(),
        &state.orchestrator,
        &headers,
        body,
    )
    .await
}

// ── Build API ──

async fn trigger_build_handler(
    State(state): State<ZappRouterState>,
    Json(req): Json<api::TriggerRequest>,
) -> Result<(StatusCode, Json<api::TriggerResponse>), StatusCode> {
    let response = api::trigger_build(state.store.as_ref(), req)
        .await
        .map_err(|e| {
            tracing::error!("Trigger build error: {e}");
            StatusCode::BAD_REQUEST
        })?;

    state.orchestrator.wake();
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(serde::Deserialize)]
pub struct ListBuildsQuery {
    pub repository_id: Option<i64>,
    pub limit: Option<i64>,
}

async fn list_builds_handler(
    State(state): State<ZappRouterState>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<api::BuildJson>>, StatusCode> {
    api::list_builds(
        state.store.as_ref(),
        &state.orchestrator,
        query.repository_id,
        query.limit.unwrap_or(20),
    )
    .await
    .map(Json)
    .map_err(|e| {
        tracing::error!("List builds error: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn get_build(
    State(state): State<ZappRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<api::BuildJson>, StatusCode> {
    api::get_build(&state.orchestrator, build_id)
        .await
        .map_err(|e| {
            tracing::error!(build_id, "Get build error: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_build_log(
    State(state): State<ZappRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<api::BuildLogJson>, StatusCode> {
    api::get_build_log(&state.orchestrator, build_id)
        .await
        .map_err(|e| {
            tracing::error!(build_id, "Get build log error: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn cancel_build(
    State(state): State<ZappRouterState>,
    Path(build_id): Path<i64>,
) -> StatusCode {
    match state.orchestrator.cancel(build_id).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(BuildError::NotFound(_)) => StatusCode::NOT_FOUND,
        Err(e @ BuildError::NotRunning(_)) => {
            tracing::info!(build_id, "Cancel refused: {e}");
            StatusCode::CONFLICT
        }
        Err(e) => {
            tracing::error!(build_id, "Cancel build error: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ── Repository API ──

async fn list_repositories(
    State(state): State<ZappRouterState>,
) -> Result<Json<Vec<Repository>>, StatusCode> {
    api::list_repositories(state.store.as_ref())
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn create_repository(
    State(state): State<ZappRouterState>,
    Json(new_repository): Json<NewRepository>,
) -> Result<(StatusCode, Json<Repository>), StatusCode> {
    api::create_repository(state.store.as_ref(), new_repository)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(|e| {
            tracing::error!("Create repository error: {e}");
            StatusCode::BAD_REQUEST
        })
}

async fn get_latest_build(
    State(state): State<ZappRouterState>,
    Path(repository_id): Path<i64>,
) -> Result<Json<api::BuildJson>, StatusCode> {
    api::get_latest_build(state.store.as_ref(), &state.orchestrator, repository_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use serde_json::{json, Value};
    use sha2::Sha256;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::scripted::ScriptedEngine;
    use crate::engine::BuildOutcome;
    use crate::store::MemoryStore;

    const SECRET: &str = "hook-secret";

    fn state() -> ZappRouterState {
        let store: Arc<dyn BuildStore> = Arc::new(MemoryStore::new());
        let engine = ScriptedEngine::new(BuildOutcome::Succeeded).with_lines(&["Build succeeded"]);
        let config = ZappConfig {
            github_webhook_secret: SECRET.into(),
            ..ZappConfig::default()
        };
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(engine), config.clone());
        ZappRouterState {
            store,
            orchestrator,
            config,
        }
    }

    async fn send(state: &ZappRouterState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn register(state: &ZappRouterState, body: Value) -> i64 {
        let (status, repo) = send(state, post_json("/api/repositories", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        repo["id"].as_i64().unwrap()
    }

    async fn settle(state: &ZappRouterState) {
        for _ in 0..200 {
            if state.orchestrator.in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("builds did not finish");
    }

    #[tokio::test]
    async fn trigger_run_and_read_log() {
        let state = state();
        let repo_id = register(&state, json!({"name": "app", "local_path": "/tmp/app"})).await;

        let (status, triggered) = send(
            &state,
            post_json(
                "/api/builds/trigger",
                json!({
                    "repository_id": repo_id,
                    "scheme": "Debug",
                    "platform": {"os": "iOS", "version": "17.0"}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(triggered["status"], "not_started");
        assert_eq!(triggered["description"], "Debug on iOS 17.0: Not started");
        let id = triggered["id"].as_i64().unwrap();

        assert_eq!(state.orchestrator.poll_once().await.unwrap(), Some(id));
        settle(&state).await;

        let (status, build) = send(&state, get(&format!("/api/builds/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(build["status"], "succeeded");
        assert_eq!(build["status_description"], "Succeeded");
        assert!(build["end_timestamp"].as_f64() >= build["start_timestamp"].as_f64());

        let (status, log) = send(&state, get(&format!("/api/builds/{id}/log"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(log["lines"], json!(["Build succeeded"]));

        let (_, builds) = send(&state, get(&format!("/api/builds?repository_id={repo_id}"))).await;
        assert_eq!(builds.as_array().unwrap().len(), 1);

        let (status, latest) =
            send(&state, get(&format!("/api/repositories/{repo_id}/latest"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest["id"], id);
    }

    #[tokio::test]
    async fn trigger_without_target_is_rejected() {
        let state = state();
        let repo_id = register(&state, json!({"name": "app", "local_path": "/tmp/app"})).await;

        let (status, _) = send(
            &state,
            post_json("/api/builds/trigger", json!({"repository_id": repo_id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_requires_a_running_build() {
        let state = state();
        let repo_id = register(&state, json!({"name": "app", "local_path": "/tmp/app"})).await;
        let (_, triggered) = send(
            &state,
            post_json(
                "/api/builds/trigger",
                json!({"repository_id": repo_id, "scheme": "Debug", "platform": {"os": "iOS"}}),
            ),
        )
        .await;
        let id = triggered["id"].as_i64().unwrap();

        let cancel = |id: i64| {
            Request::post(format!("/api/builds/{id}/cancel"))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(send(&state, cancel(id)).await.0, StatusCode::CONFLICT);
        assert_eq!(send(&state, cancel(999)).await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&state, get("/api/builds/999")).await.0, StatusCode::NOT_FOUND);
    }

    fn webhook(event: &str, body: &Value, secret: &str) -> Request<Body> {
        let body = body.to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        Request::post("/webhook/github")
            .header("x-github-event", event)
            .header("x-hub-signature-256", signature)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn push_webhook_queues_a_build() {
        let state = state();
        let repo_id = register(
            &state,
            json!({
                "name": "app",
                "local_path": "/tmp/app",
                "github_repo": "square/app",
                "last_scheme": "Release",
                "last_platform": {"os": "iOS"}
            }),
        )
        .await;

        let push = json!({
            "ref": "refs/heads/master",
            "after": "abc123",
            "repository": {"full_name": "square/app"},
            "commits": [{"message": "Fix crash"}]
        });

        let (status, _) = send(&state, webhook("push", &push, "wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&state, webhook("push", &push, SECRET)).await;
        assert_eq!(status, StatusCode::CREATED);

        let builds = state.store.list_builds(Some(repo_id), 10).await.unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].latest_revision.as_deref(), Some("abc123"));
        assert_eq!(builds[0].commit_log, "Fix crash");
        assert_eq!(builds[0].description(), "Release on iOS: Not started");

        let feature = json!({
            "ref": "refs/heads/feature",
            "after": "def456",
            "repository": {"full_name": "square/app"}
        });
        let (status, _) = send(&state, webhook("push", &feature, SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.store.list_builds(Some(repo_id), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(&state(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
