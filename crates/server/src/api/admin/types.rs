//! Admin API response types.

use serde::Serialize;

use visiontag_core::{RecentDetection, TelemetrySnapshot};

use crate::api::types::TagCount;

/// Resolved runtime settings, as reported by GET /api/v1/admin/runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSettingsResponse {
    pub app_name: String,
    pub app_version: String,
    pub auth_required: bool,
    pub rate_limit_per_minute: usize,
    pub max_upload_mb: usize,
    pub max_batch_files: usize,
    pub max_dimension: u32,
    pub cache_ttl_seconds: u64,
    pub cache_max_items: usize,
    pub max_concurrent_inference: usize,
    pub inference_timeout_seconds: u64,
    pub cors_origins: Vec<String>,
    pub remote_fetch_timeout_seconds: u64,
    pub max_remote_image_mb: usize,
}

/// GET /api/v1/admin/recent
#[derive(Debug, Clone, Serialize)]
pub struct RecentDetectionResponse {
    pub total: usize,
    pub items: Vec<RecentDetection>,
}

/// One payload source with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub count: usize,
}

/// Rollup over the recent-activity window.
#[derive(Debug, Clone, Serialize)]
pub struct RecentSummary {
    pub window_size: usize,
    pub cache_hit_ratio: f64,
    pub sources: Vec<SourceCount>,
    pub top_tags: Vec<TagCount>,
}

/// GET /api/v1/admin/overview
#[derive(Debug, Clone, Serialize)]
pub struct AdminOverviewResponse {
    pub metrics: TelemetrySnapshot,
    pub runtime: RuntimeSettingsResponse,
    pub cache_items: usize,
    pub recent: RecentSummary,
    pub recent_items: Vec<RecentDetection>,
}

/// GET /api/v1/admin/cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    pub cache_items: usize,
}

/// DELETE /api/v1/admin/cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheClearResponse {
    pub removed_items: usize,
}
