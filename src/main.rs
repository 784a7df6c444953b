mod catalog;
mod config;
mod feed;
mod http;
mod jobs;
mod metrics;
mod models;
mod retry;
mod security;
mod sync;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::{MemoryCatalog, RestCatalog};
use config::{CatalogSettings, Settings};
use eyre::WrapErr;
use jobs::{RunInfo, RunQueue, Trigger};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::ApiError;
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use sync::Reconciler;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "propfeed.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    init_tracing();

    let settings = Settings::load().wrap_err("invalid configuration")?;
    let reconciler = build_reconciler(&settings);
    let (queue, _worker) = RunQueue::spawn(
        reconciler,
        settings.service.queue_capacity,
        settings.service.run_history,
    );

    if settings.service.run_on_start {
        match queue.enqueue(Trigger::Startup).await {
            Ok(id) => info!(target = "propfeed.api", run = %id, "startup_run_enqueued"),
            Err(err) => warn!(target = "propfeed.api", error = %err.error, "startup_run_rejected"),
        }
    }
    if let Some(interval) = settings.service.sync_interval {
        info!(
            target = "propfeed.api",
            interval_secs = interval.as_secs(),
            "scheduler_started"
        );
        jobs::spawn_scheduler(queue.clone(), interval);
    }

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("unable to install prometheus recorder")?;
    let state = AppState {
        queue,
        prometheus_handle,
        metrics_key: settings.service.metrics_key.clone(),
    };
    let auth_state = AuthState::from_list(&settings.service.api_keys);
    let api_keys = auth_state.key_count();
    let app = build_router(state, auth_state);

    let addr: SocketAddr = ([0, 0, 0, 0], settings.service.port).into();
    info!(target = "propfeed.api", api_keys, "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("unable to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn build_reconciler(settings: &Settings) -> Reconciler {
    let source = feed::build_source(&settings.feed, &settings.http, &settings.retry);
    info!(
        target = "propfeed.api",
        source = %source.describe(),
        "feed_source_configured"
    );
    match &settings.catalog {
        CatalogSettings::Rest(rest) => {
            let store = Arc::new(RestCatalog::new(rest, &settings.http, settings.retry));
            Reconciler::new(source, store.clone(), store, settings.brand.clone())
        }
        CatalogSettings::Memory => {
            warn!(
                target = "propfeed.api",
                "memory catalog selected; reconciled records are discarded on exit"
            );
            let store = Arc::new(MemoryCatalog::new());
            Reconciler::new(source, store.clone(), store, settings.brand.clone())
        }
    }
}

fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/runs", post(enqueue_run))
        .route("/runs/{id}", get(get_run))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
struct AppState {
    queue: RunQueue,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

/// Liveness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "propfeed-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let body = state.prometheus_handle.render();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    run_id: String,
}

/// Queue a reconciliation run.
///
/// - Method: `POST`
/// - Path: `/runs`
/// - Auth: `Authorization: Bearer <key>` or `X-Propfeed-Key: <key>`
/// - Response: `202` with `{ "run_id": ... }`
async fn enqueue_run(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/runs");
    let id = state
        .queue
        .enqueue(Trigger::Api)
        .await
        .map_err(AppError::QueueUnavailable)?;
    info!(
        target = "propfeed.api",
        client = %context.client,
        api_key = %context.api_key_id,
        run = %id,
        "run_enqueued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            run_id: id.to_string(),
        }),
    ))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunInfo>, AppError> {
    crate::metrics::inc_requests("/runs/{id}");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::InvalidRunId);
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::UnknownRun)
}

#[derive(Debug)]
enum AppError {
    InvalidRunId,
    UnknownRun,
    QueueUnavailable(ApiError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::InvalidRunId => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: "invalid_run_id".into(),
                    detail: None,
                },
            ),
            AppError::UnknownRun => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: None,
                },
            ),
            AppError::QueueUnavailable(err) => (StatusCode::SERVICE_UNAVAILABLE, err),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedSource, TransportError};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::sync::OnceLock;
    use tower::ServiceExt;

    // The facade accepts a single global recorder per process.
    fn prometheus_handle() -> PrometheusHandle {
        static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
        HANDLE
            .get_or_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .expect("install recorder")
            })
            .clone()
    }

    struct EmptyFeed;

    #[async_trait]
    impl FeedSource for EmptyFeed {
        async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
            Ok(b"<properties/>".to_vec())
        }

        fn describe(&self) -> String {
            "empty".into()
        }
    }

    fn app(metrics_key: Option<&str>) -> Router {
        let store = Arc::new(MemoryCatalog::new());
        let reconciler = Reconciler::new(Arc::new(EmptyFeed), store.clone(), store, "Test");
        let (queue, _worker) = RunQueue::spawn(reconciler, 2, 8);
        let state = AppState {
            queue,
            prometheus_handle: prometheus_handle(),
            metrics_key: metrics_key.map(str::to_string),
        };
        build_router(state, AuthState::from_list("ops:letmein"))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app(None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn runs_require_a_key() {
        let response = app(None)
            .oneshot(Request::post("/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn enqueued_runs_can_be_polled() {
        let app = app(None);
        let response = app
            .clone()
            .oneshot(
                Request::post("/runs")
                    .header("X-Propfeed-Key", "letmein")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let run_id = body_json(response).await["run_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/runs/{run_id}"))
                    .header("Authorization", "Bearer letmein")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let info = body_json(response).await;
        assert_eq!(info["id"], run_id.as_str());
        assert!(info["state"].is_string());

        let response = app
            .oneshot(
                Request::get("/runs/not-a-uuid")
                    .header("Authorization", "Bearer letmein")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn finished_runs_show_up_in_metrics() {
        let app = app(None);
        let response = app
            .clone()
            .oneshot(
                Request::post("/runs")
                    .header("X-Propfeed-Key", "letmein")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let run_id = body_json(response).await["run_id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut finished = false;
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/runs/{run_id}"))
                        .header("Authorization", "Bearer letmein")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            if body_json(response).await["state"] == "completed" {
                finished = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(finished, "run did not complete");

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("propfeed_runs_total"), "{body}");
        assert!(body.contains("propfeed_http_requests_total"), "{body}");
    }

    #[tokio::test]
    async fn metrics_key_is_enforced() {
        let app = app(Some("scrape"));
        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/metrics")
                    .header("X-Metrics-Key", "scrape")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
