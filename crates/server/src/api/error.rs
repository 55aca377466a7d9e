//! HTTP error mapping.
//!
//! Every failure crossing the API boundary becomes an `ApiError`, which
//! renders as the JSON envelope `{detail, error: {code, message,
//! details}}` plus the matching status code. Internal failures are logged
//! with full context and surfaced with a generic message.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use visiontag_core::{AuthError, DetectError};

#[derive(Debug)]
pub enum ApiError {
    /// 400 — bad, empty, or undecodable payload. Never retriable.
    InvalidInput(String),
    /// 401 — missing or unrecognized credential.
    Unauthorized(String),
    /// 403 — valid credential, insufficient scope.
    Forbidden(String),
    /// 413 — payload exceeds the configured size limit.
    PayloadTooLarge(String),
    /// 415 — content type outside the image allowlist.
    UnsupportedMediaType(String),
    /// 429 — rate limited; carries the retry hint in seconds.
    RateLimited { retry_after: u64 },
    /// 504 — inference exceeded its deadline. Retriable.
    Timeout(String),
    /// 500 — everything else. The original error is logged, not leaked.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorEnvelope {
    detail: String,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::Unauthorized(_) => "authentication_error",
            ApiError::Forbidden(_) => "authorization_error",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::UnsupportedMediaType(_) => "unsupported_media_type",
            ApiError::RateLimited { .. } => "rate_limit_exceeded",
            ApiError::Timeout(_) => "processing_timeout",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details, retry_after) = match self {
            ApiError::RateLimited { retry_after } => (
                "request rate limit exceeded".to_string(),
                Some(json!({ "retry_after": retry_after })),
                Some(retry_after),
            ),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "unhandled internal error");
                ("internal server error".to_string(), None, None)
            }
            ApiError::InvalidInput(message)
            | ApiError::Unauthorized(message)
            | ApiError::Forbidden(message)
            | ApiError::PayloadTooLarge(message)
            | ApiError::UnsupportedMediaType(message)
            | ApiError::Timeout(message) => (message, None, None),
        };

        let body = ErrorEnvelope {
            detail: message.clone(),
            error: ErrorBody {
                code,
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::InvalidInput(message) => ApiError::InvalidInput(message),
            DetectError::UnsupportedMediaType(message) => ApiError::UnsupportedMediaType(message),
            DetectError::PayloadTooLarge(message) => ApiError::PayloadTooLarge(message),
            DetectError::Timeout(secs) => {
                ApiError::Timeout(format!("inference timed out after {secs}s"))
            }
            DetectError::Inference(message) => ApiError::Internal(message),
            DetectError::Internal(message) => ApiError::Internal(message),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredential | AuthError::InvalidCredential => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::MissingScopes(_) => ApiError::Forbidden(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limited_response_carries_retry_after() {
        let response = ApiError::RateLimited { retry_after: 17 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &header::HeaderValue::from_static("17")
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "rate_limit_exceeded");
        assert_eq!(body["error"]["details"]["retry_after"], 17);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_the_cause() {
        let response =
            ApiError::Internal("db password is hunter2".to_string()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "internal server error");
        assert!(!bytes.windows(7).any(|w| w == b"hunter2"));
    }

    #[test]
    fn detect_errors_map_to_the_contract_status_codes() {
        let cases = [
            (DetectError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                DetectError::UnsupportedMediaType("x".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                DetectError::PayloadTooLarge("x".into()),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (DetectError::Timeout(5), StatusCode::GATEWAY_TIMEOUT),
            (
                DetectError::Inference("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn auth_errors_split_into_401_and_403() {
        assert_eq!(
            ApiError::from(AuthError::MissingCredential).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::MissingScopes(vec!["admin".into()])).status(),
            StatusCode::FORBIDDEN
        );
    }
}
