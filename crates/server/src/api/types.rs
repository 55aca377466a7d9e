//! Public API request/response types.

use serde::{Deserialize, Serialize};

use visiontag_core::DetectionResult;

/// GET /api/v1/health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub model_path: String,
    pub model_loaded: bool,
    pub labels_count: usize,
    pub auth_required: bool,
    pub rate_limit_per_minute: usize,
}

/// GET /api/v1/labels
#[derive(Debug, Clone, Serialize)]
pub struct LabelsResponse {
    pub total: usize,
    pub labels: Vec<String>,
}

/// POST /api/v1/detect/url request body.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectUrlRequest {
    pub image_url: String,
}

/// POST /api/v1/detect/base64 request body. Accepts bare base64 or a
/// `data:image/...;base64,` URL.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectBase64Request {
    pub image_base64: String,
}

/// Legacy POST /detect response.
#[derive(Debug, Clone, Serialize)]
pub struct TagsResponse {
    pub tags: Vec<String>,
}

/// One tag with its occurrence count, descending-count order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// One file's outcome inside a batch response. Exactly one of `result`
/// and `error` is present.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DetectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counters for one batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub success: usize,
    pub failed: usize,
    pub cached_hits: usize,
    pub top_tags: Vec<TagCount>,
}

/// POST /api/v1/detect/batch response.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetectResponse {
    pub items: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

/// Query parameters accepted by every detect endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectQuery {
    pub conf: Option<f32>,
    pub max_tags: Option<usize>,
    pub min_area: Option<f32>,
    pub include_person: Option<bool>,
    pub include_labels: Option<String>,
    pub exclude_labels: Option<String>,
}
