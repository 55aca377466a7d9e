//! Admin surface: metrics, recent activity, runtime settings, and cache
//! management. Every endpoint requires the admin scope; none are rate
//! limited.

pub mod types;

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use visiontag_core::{RecentDetection, SCOPE_ADMIN};

use self::types::{
    AdminOverviewResponse, CacheClearResponse, CacheStatsResponse, RecentDetectionResponse,
    RecentSummary, RuntimeSettingsResponse, SourceCount,
};
use super::error::ApiError;
use super::middleware::{client_ip, require_access};
use super::types::TagCount;
use super::AppState;
use crate::config::Settings;

const TOP_TAGS_LIMIT: usize = 8;
const OVERVIEW_ITEMS_LIMIT: usize = 12;

fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    connect: &Option<ConnectInfo<SocketAddr>>,
) -> Result<(), ApiError> {
    require_access(state, headers, &client_ip(connect), &[SCOPE_ADMIN], false).map(|_| ())
}

fn runtime_settings(settings: &Settings) -> RuntimeSettingsResponse {
    RuntimeSettingsResponse {
        app_name: settings.app_name.clone(),
        app_version: Settings::version().to_string(),
        auth_required: settings.auth_required,
        rate_limit_per_minute: settings.rate_limit_per_minute,
        max_upload_mb: settings.max_upload_mb,
        max_batch_files: settings.max_batch_files,
        max_dimension: settings.max_dimension,
        cache_ttl_seconds: settings.cache_ttl_seconds,
        cache_max_items: settings.cache_max_items,
        max_concurrent_inference: settings.max_concurrent_inference,
        inference_timeout_seconds: settings.inference_timeout_seconds,
        cors_origins: settings.cors_origins.clone(),
        remote_fetch_timeout_seconds: settings.remote_fetch_timeout_seconds,
        max_remote_image_mb: settings.max_remote_image_mb,
    }
}

fn recent_summary(entries: &[RecentDetection]) -> RecentSummary {
    let cached_hits = entries.iter().filter(|e| e.cached).count();
    let cache_hit_ratio = if entries.is_empty() {
        0.0
    } else {
        let ratio = cached_hits as f64 / entries.len() as f64;
        (ratio * 10_000.0).round() / 10_000.0
    };

    let mut source_counts = std::collections::HashMap::new();
    for entry in entries {
        *source_counts.entry(entry.source.clone()).or_insert(0usize) += 1;
    }
    let mut sources: Vec<SourceCount> = source_counts
        .into_iter()
        .map(|(source, count)| SourceCount { source, count })
        .collect();
    sources.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.source.cmp(&b.source)));

    let all_tags: Vec<&String> = entries.iter().flat_map(|e| e.tags.iter()).collect();
    let top_tags = visiontag_core::imaging::tag_frequency(&all_tags)
        .into_iter()
        .take(TOP_TAGS_LIMIT)
        .map(|(tag, count)| TagCount { tag, count })
        .collect();

    RecentSummary {
        window_size: entries.len(),
        cache_hit_ratio,
        sources,
        top_tags,
    }
}

/// GET /api/v1/metrics — telemetry snapshot.
pub async fn metrics(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<visiontag_core::TelemetrySnapshot>, ApiError> {
    require_admin(&state, &headers, &connect)?;
    Ok(Json(state.telemetry.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/admin/recent — latest detection events, newest first.
pub async fn recent(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<RecentQuery>,
) -> Result<Json<RecentDetectionResponse>, ApiError> {
    require_admin(&state, &headers, &connect)?;
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let items = state.telemetry.recent(limit);
    Ok(Json(RecentDetectionResponse {
        total: items.len(),
        items,
    }))
}

/// GET /api/v1/admin/runtime — resolved runtime settings.
pub async fn runtime(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<RuntimeSettingsResponse>, ApiError> {
    require_admin(&state, &headers, &connect)?;
    Ok(Json(runtime_settings(&state.settings)))
}

#[derive(Debug, Deserialize)]
pub struct OverviewQuery {
    pub recent_limit: Option<usize>,
}

/// GET /api/v1/admin/overview — metrics + runtime + cache + recent rollup.
pub async fn overview(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<OverviewQuery>,
) -> Result<Json<AdminOverviewResponse>, ApiError> {
    require_admin(&state, &headers, &connect)?;
    let recent_limit = query.recent_limit.unwrap_or(30).clamp(5, 200);
    let entries = state.telemetry.recent(recent_limit);
    let recent_items: Vec<RecentDetection> = entries
        .iter()
        .take(OVERVIEW_ITEMS_LIMIT)
        .cloned()
        .collect();

    Ok(Json(AdminOverviewResponse {
        metrics: state.telemetry.snapshot(),
        runtime: runtime_settings(&state.settings),
        cache_items: state.provider.cache_size(),
        recent: recent_summary(&entries),
        recent_items,
    }))
}

/// GET /api/v1/admin/cache — live cache entry count.
pub async fn cache_stats(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<CacheStatsResponse>, ApiError> {
    require_admin(&state, &headers, &connect)?;
    Ok(Json(CacheStatsResponse {
        cache_items: state.provider.cache_size(),
    }))
}

/// DELETE /api/v1/admin/cache — drop every cached result.
pub async fn cache_clear(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<CacheClearResponse>, ApiError> {
    require_admin(&state, &headers, &connect)?;
    let removed = state.provider.clear_cache();
    tracing::info!(removed_items = removed, "result cache cleared");
    Ok(Json(CacheClearResponse {
        removed_items: removed,
    }))
}
