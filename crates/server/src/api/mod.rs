//! HTTP API: state, router assembly, and the public endpoints.

pub mod admin;
pub mod detect;
pub mod error;
pub mod middleware;
pub mod types;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use visiontag_core::{
    labels, AuthService, DetectionServiceProvider, InferenceGate, SlidingWindowRateLimiter,
    TelemetryStore,
};

use self::types::{HealthResponse, LabelsResponse};
use crate::config::Settings;

/// Everything the handlers need, injected at construction time.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub telemetry: Arc<TelemetryStore>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
    pub provider: Arc<DetectionServiceProvider>,
    pub gate: Arc<InferenceGate>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        telemetry: Arc<TelemetryStore>,
        auth: Arc<AuthService>,
        rate_limiter: Arc<SlidingWindowRateLimiter>,
        provider: Arc<DetectionServiceProvider>,
        gate: Arc<InferenceGate>,
    ) -> Self {
        Self {
            settings,
            telemetry,
            auth,
            rate_limiter,
            provider,
            gate,
        }
    }
}

/// Build a `CorsLayer` from the configured origin list.
///
/// `*` (the default) produces a fully permissive layer; anything else is
/// parsed into an explicit origin list.
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::very_permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            let trimmed = origin.trim();
            if trimmed.is_empty() {
                return None;
            }
            HeaderValue::from_str(trimmed).ok()
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
}

/// Assemble the full router: public, detect, and admin endpoints, wrapped
/// in the request-context middleware, CORS, and a body limit sized for
/// the largest allowed batch.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.settings.cors_origins);
    // A batch may carry max_batch_files full-size files plus multipart
    // framing overhead.
    let body_limit =
        state.settings.max_upload_bytes() * state.settings.max_batch_files + 64 * 1024;

    Router::new()
        .route("/", get(index))
        .route("/api/v1/health", get(health))
        .route("/api/v1/labels", get(labels_catalog))
        .route("/api/v1/metrics", get(admin::metrics))
        .route("/api/v1/admin/recent", get(admin::recent))
        .route("/api/v1/admin/runtime", get(admin::runtime))
        .route("/api/v1/admin/overview", get(admin::overview))
        .route(
            "/api/v1/admin/cache",
            get(admin::cache_stats).delete(admin::cache_clear),
        )
        .route("/api/v1/detect", post(detect::detect))
        .route("/api/v1/detect/base64", post(detect::detect_base64))
        .route("/api/v1/detect/url", post(detect::detect_url))
        .route("/api/v1/detect/batch", post(detect::detect_batch))
        .route("/detect", post(detect::detect_legacy))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_context,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// GET / — service banner.
async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "VisionTag API is running",
        "health": "/api/v1/health",
    }))
}

/// GET /api/v1/health — liveness and deployment facts.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: Settings::version().to_string(),
        model_path: state.settings.model_path.clone(),
        model_loaded: state.provider.model_loaded(),
        labels_count: labels::catalog().len(),
        auth_required: state.settings.auth_required,
        rate_limit_per_minute: state.settings.rate_limit_per_minute,
    })
}

/// GET /api/v1/labels — the label catalog.
async fn labels_catalog() -> Json<LabelsResponse> {
    let labels = labels::catalog();
    Json(LabelsResponse {
        total: labels.len(),
        labels,
    })
}
