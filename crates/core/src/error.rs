//! Error taxonomy for the detection pipeline.
//!
//! `DetectError` covers everything that can go wrong between receiving a
//! payload and producing a `DetectionResult`. Authentication failures live
//! in their own enum because they are decided before any payload is read.

use thiserror::Error;

/// Failures raised by the detection pipeline.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Bad, empty, or undecodable input. Never retriable.
    #[error("{0}")]
    InvalidInput(String),

    /// Payload declared or carried a content type outside the image allowlist.
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Payload exceeds the configured size limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Inference did not complete within the configured deadline. The
    /// underlying compute may still be running; its result is discarded.
    #[error("inference timed out after {0}s")]
    Timeout(u64),

    /// The detector backend itself faulted.
    #[error("model inference failed: {0}")]
    Inference(String),

    /// Anything unexpected. Surfaced as a generic failure.
    #[error("{0}")]
    Internal(String),
}

/// Failures raised while resolving a caller identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Authentication is required and no credential was presented.
    #[error("API key required; send it via the X-API-Key header")]
    MissingCredential,

    /// A credential was presented but matches no configured key.
    #[error("invalid API key")]
    InvalidCredential,

    /// The credential is valid but lacks one or more required scopes.
    #[error("insufficient permissions; missing scopes: {}", .0.join(", "))]
    MissingScopes(Vec<String>),
}
