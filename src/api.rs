//! REST endpoints for job intake, status, metrics and cache administration.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{error, warn};

use crate::jobs::{Article, Job};
use crate::pipeline::{Pipeline, SwitchRequest};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Build the Axum router over `pipeline`.
pub fn routes(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/metrics", get(get_metrics))
        .route("/api/admin/cache/switch", post(switch_cache))
        .with_state(AppState { pipeline })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "article-analyzer",
        "cache": state.pipeline.cache_strategy(),
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    job_id: Option<String>,
    article: Article,
}

/// POST /api/jobs
async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> impl IntoResponse {
    let job = match body.job_id {
        Some(id) if !id.trim().is_empty() => Job::with_id(id, body.article),
        _ => Job::new(body.article),
    };

    match state.pipeline.submit_job(job).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"jobId": job.job_id, "status": job.status})),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Job submission rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// GET /api/jobs/{id}
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.pipeline.job_status(&id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(serde_json::json!(record))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Job not found"})),
        )
            .into_response(),
        Err(e) => {
            error!(job_id = %id, error = %e, "Job lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

// ── Metrics ─────────────────────────────────────────────────────────────

async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = &state.pipeline;
    Json(serde_json::json!({
        "metrics": pipeline.metrics(),
        "queue": pipeline.queue_stats(),
        "pool": pipeline.pool_stats(),
        "cache": pipeline.cache_strategy(),
    }))
}

// ── Admin ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SwitchBody {
    strategy: String,
    mode: String,
}

/// POST /api/admin/cache/switch
async fn switch_cache(
    State(state): State<AppState>,
    Json(body): Json<SwitchBody>,
) -> impl IntoResponse {
    let request = match SwitchRequest::parse(&body.strategy, &body.mode) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    match state.pipeline.switch_cache(request).await {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::json!(outcome))).into_response(),
        Err(e) => {
            error!(error = %e, "Cache switch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::CacheStrategy;
    use crate::config::{CacheConfig, PipelineConfig, PoolConfig};

    async fn app() -> (Router, Arc<Pipeline>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            cache: CacheConfig {
                strategy: CacheStrategy::InMemory,
                directory: dir.path().join("cache"),
                sweep_interval: Duration::ZERO,
            },
            pool: PoolConfig {
                enabled: false,
                size: 1,
            },
            results_dir: Some(dir.path().join("results")),
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(Pipeline::new(config).await.unwrap());
        pipeline.start().unwrap();
        (routes(Arc::clone(&pipeline)), pipeline, dir)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_cache() {
        let (app, _pipeline, _dir) = app().await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["cache"], "inmemory");
    }

    #[tokio::test]
    async fn submit_returns_accepted_with_id() {
        let (app, _pipeline, _dir) = app().await;
        let response = app
            .oneshot(post_json(
                "/api/jobs",
                json!({"jobId": "job-42", "article": {"id": "a", "title": "T", "content": "hi"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body, json!({"jobId": "job-42", "status": "queued"}));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (app, _pipeline, _dir) = app().await;
        let response = app.oneshot(get("/api/jobs/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submitted_job_is_visible() {
        let (app, pipeline, _dir) = app().await;
        app.clone()
            .oneshot(post_json(
                "/api/jobs",
                json!({"jobId": "visible", "article": {"id": "a", "content": "one two"}}),
            ))
            .await
            .unwrap();

        for _ in 0..500 {
            if pipeline.metrics().processed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = app.oneshot(get("/api/jobs/visible")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["result"]["wordCount"], 2);
    }

    #[tokio::test]
    async fn switch_rejects_unknown_strategy() {
        let (app, _pipeline, _dir) = app().await;
        let response = app
            .oneshot(post_json(
                "/api/admin/cache/switch",
                json!({"strategy": "redis", "mode": "migrate"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("redis"));
    }

    #[tokio::test]
    async fn switch_reports_outcome() {
        let (app, pipeline, _dir) = app().await;
        let response = app
            .oneshot(post_json(
                "/api/admin/cache/switch",
                json!({"strategy": "file", "mode": "migrate"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body,
            json!({"success": true, "strategy": "file", "mode": "migrate", "migrated": 0})
        );
        assert_eq!(pipeline.cache_strategy(), CacheStrategy::File);
    }

    #[tokio::test]
    async fn metrics_include_queue_and_pool() {
        let (app, _pipeline, _dir) = app().await;
        let response = app.oneshot(get("/api/metrics")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["metrics"]["processed"], 0);
        assert_eq!(body["queue"]["running"], true);
        assert!(body["pool"].is_null());
    }
}
