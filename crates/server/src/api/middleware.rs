//! Request middleware and access guards.
//!
//! `request_context` wraps every route: it assigns the correlation ID,
//! times the request, feeds the telemetry store for every outcome
//! (including errors), and stamps the response headers. The access guard
//! is called at the top of each protected handler, mirroring the order
//! credential -> scopes -> rate limit.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use visiontag_core::{Principal, SCOPE_DETECT};

use super::error::ApiError;
use super::AppState;

/// Correlation ID assigned to every request, exposed via extensions and
/// the `X-Request-ID` response header.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn security_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ),
        (
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ),
        (
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ),
        (
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
        ),
    ]
}

/// Correlation + telemetry + security-header middleware.
pub async fn request_context(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().simple().to_string();
    let path = request.uri().path().to_string();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let started = Instant::now();
    let mut response = next.run(request).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    state
        .telemetry
        .record_request(&path, response.status().as_u16(), latency_ms);

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }
    for (name, value) in security_headers() {
        headers.insert(name, value);
    }

    response
}

/// Pull the credential out of `X-API-Key` or `Authorization: Bearer`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let (scheme, token) = authorization.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Best-effort client address for rate-limit identities.
///
/// Absent when the router was built without connect info (tests).
pub fn client_ip(connect: &Option<ConnectInfo<SocketAddr>>) -> String {
    connect
        .as_ref()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Authenticate, authorize, and (optionally) rate limit one request.
///
/// Rate limiting is keyed on `key_id:client_ip` so anonymous callers are
/// still throttled per source address.
pub fn require_access(
    state: &AppState,
    headers: &HeaderMap,
    client_ip: &str,
    scopes: &[&str],
    rate_limited: bool,
) -> Result<Principal, ApiError> {
    let token = extract_api_key(headers);
    let principal = state.auth.authenticate(token.as_deref())?;
    state
        .auth
        .ensure_scopes(&principal, scopes.iter().copied())?;

    if rate_limited {
        let identity = format!("{}:{}", principal.key_id, client_ip);
        let decision = state.rate_limiter.check(&identity);
        if !decision.allowed {
            return Err(ApiError::RateLimited {
                retry_after: decision.retry_after,
            });
        }
    }

    Ok(principal)
}

/// Shorthand for the detect endpoints: detect scope + rate limiting.
pub fn require_detect_access(
    state: &AppState,
    headers: &HeaderMap,
    client_ip: &str,
) -> Result<Principal, ApiError> {
    require_access(state, headers, client_ip, &[SCOPE_DETECT], true)
}
