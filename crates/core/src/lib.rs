//! VisionTag core — the request-processing pipeline around an
//! object-detection capability.
//!
//! The detection model itself is external: anything implementing
//! [`ObjectDetector`] can be plugged in. What this crate owns is the
//! machinery that makes a model usable behind an API: option
//! normalization, tag resolution, a fingerprinted TTL+LRU result cache,
//! a concurrency/timeout-bounded inference gate, credential and scope
//! checks, sliding-window rate limiting, and the telemetry store every
//! request reports into.

pub mod cache;
pub mod detector;
pub mod error;
pub mod gate;
pub mod imaging;
pub mod labels;
pub mod options;
pub mod security;
pub mod service;
pub mod tagging;
pub mod telemetry;
pub mod types;

pub use detector::{BBox, ObjectDetector, RawDetection, StubDetector};
pub use error::{AuthError, DetectError};
pub use gate::InferenceGate;
pub use options::DetectionOptions;
pub use security::{
    AuthService, Principal, RateLimitDecision, SlidingWindowRateLimiter, SCOPE_ADMIN, SCOPE_DETECT,
};
pub use service::{
    DetectionService, DetectionServiceProvider, DetectorBuilder, ProviderConfig, RequestContext,
};
pub use telemetry::{RecentDetection, TelemetrySnapshot, TelemetryStore};
pub use types::{BoundingBox, Detection, DetectionResult};
