//! Wire-level detection result types.
//!
//! These are the shapes cached by [`crate::cache::ResultCache`] and
//! serialized by the HTTP surface. `DetectionResult` is immutable once
//! constructed; the cache stores and returns deep copies (`Clone` here is
//! a deep copy — every field is owned).

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates, rounded for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// A resolved detection: translated label, clamped and rounded box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Final result of one detection request.
///
/// `tags` and `detections` are ordered by descending confidence, ties
/// broken by first-seen order; each label appears at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub tags: Vec<String>,
    pub detections: Vec<Detection>,
    pub total_detections: usize,
    pub inference_ms: f64,
    pub cached: bool,
}
