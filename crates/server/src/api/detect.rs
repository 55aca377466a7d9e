//! Detection endpoints: multipart upload, base64, remote URL, and batch.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Extension, Multipart, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use base64::Engine as _;
use tracing::debug;

use visiontag_core::{
    imaging, options::parse_label_csv, DetectError, DetectionOptions, DetectionResult,
    RequestContext,
};

use super::error::ApiError;
use super::middleware::{client_ip, require_detect_access, RequestId};
use super::types::{
    BatchDetectResponse, BatchItemResult, BatchSummary, DetectBase64Request, DetectQuery,
    DetectUrlRequest, TagCount, TagsResponse,
};
use super::AppState;
use crate::remote_fetch;

/// Upper bound on `max_tags` at the API surface (the pipeline itself
/// accepts up to 50 for embedded callers).
const API_MAX_TAGS: usize = 25;
const MAX_LABEL_CSV_LEN: usize = 400;

/// Validate query parameters and assemble normalized detection options.
fn options_from_query(query: DetectQuery) -> Result<DetectionOptions, ApiError> {
    if let Some(conf) = query.conf {
        if !(0.01..=1.0).contains(&conf) {
            return Err(ApiError::InvalidInput(format!(
                "conf must be between 0.01 and 1.0, got {conf}"
            )));
        }
    }
    if let Some(max_tags) = query.max_tags {
        if !(1..=API_MAX_TAGS).contains(&max_tags) {
            return Err(ApiError::InvalidInput(format!(
                "max_tags must be between 1 and {API_MAX_TAGS}, got {max_tags}"
            )));
        }
    }
    if let Some(min_area) = query.min_area {
        if !(0.0..=1.0).contains(&min_area) {
            return Err(ApiError::InvalidInput(format!(
                "min_area must be between 0.0 and 1.0, got {min_area}"
            )));
        }
    }
    for (name, value) in [
        ("include_labels", &query.include_labels),
        ("exclude_labels", &query.exclude_labels),
    ] {
        if let Some(value) = value {
            if value.len() > MAX_LABEL_CSV_LEN {
                return Err(ApiError::InvalidInput(format!(
                    "{name} exceeds {MAX_LABEL_CSV_LEN} characters"
                )));
            }
        }
    }

    let defaults = DetectionOptions::default();
    Ok(DetectionOptions {
        confidence: query.conf.unwrap_or(defaults.confidence),
        max_tags: query.max_tags.unwrap_or(defaults.max_tags),
        min_area_ratio: query.min_area.unwrap_or(defaults.min_area_ratio),
        include_person: query.include_person.unwrap_or(defaults.include_person),
        include_labels: parse_label_csv(query.include_labels.as_deref()),
        exclude_labels: parse_label_csv(query.exclude_labels.as_deref()),
    }
    .normalized())
}

/// Check one upload against the content-type allowlist and size limits.
fn validate_upload(
    content_type: Option<&str>,
    data: &[u8],
    max_bytes: usize,
) -> Result<(), DetectError> {
    if !imaging::is_allowed_content_type(content_type) {
        return Err(DetectError::UnsupportedMediaType(
            "unsupported image format; send JPEG, PNG, WEBP, or BMP".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(DetectError::InvalidInput("empty file".to_string()));
    }
    if data.len() > max_bytes {
        return Err(DetectError::PayloadTooLarge(format!(
            "file exceeds the {} MB limit",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Read the first file field from a multipart body.
async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }
        let filename = imaging::sanitize_filename(field.file_name());
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidInput(format!("failed to read upload: {e}")))?;
        validate_upload(
            content_type.as_deref(),
            &data,
            state.settings.max_upload_bytes(),
        )?;
        return Ok((filename, data.to_vec()));
    }
    Err(ApiError::InvalidInput("no file field in request".to_string()))
}

/// Decode a base64 payload, accepting bare base64 and `data:` URLs.
fn decode_base64_payload(raw: &str, max_bytes: usize) -> Result<Vec<u8>, DetectError> {
    let mut candidate = raw.trim();
    if candidate.is_empty() {
        return Err(DetectError::InvalidInput("empty base64 payload".to_string()));
    }

    if candidate
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("data:"))
    {
        if !candidate.contains(";base64,") {
            return Err(DetectError::InvalidInput(
                "malformed base64 data URL".to_string(),
            ));
        }
        let (prefix, encoded) = candidate.split_once(',').unwrap_or((candidate, ""));
        let declared = prefix[5..]
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !declared.is_empty() && !imaging::is_allowed_content_type(Some(&declared)) {
            return Err(DetectError::UnsupportedMediaType(
                "unsupported base64 image format".to_string(),
            ));
        }
        candidate = encoded.trim();
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(candidate)
        .map_err(|_| DetectError::InvalidInput("invalid base64 payload".to_string()))?;

    if decoded.is_empty() {
        return Err(DetectError::InvalidInput("empty base64 payload".to_string()));
    }
    if decoded.len() > max_bytes {
        return Err(DetectError::PayloadTooLarge(format!(
            "decoded payload exceeds the {} MB limit",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(decoded)
}

/// Run one payload through the gate-wrapped detection pipeline.
async fn run_detection(
    state: &AppState,
    payload: Vec<u8>,
    options: DetectionOptions,
    source: &'static str,
    principal_id: String,
    request_id: String,
) -> Result<DetectionResult, DetectError> {
    let service = state.provider.get()?;
    let ctx = RequestContext {
        source: source.to_string(),
        principal_id,
        request_id,
    };
    state
        .gate
        .run(move || service.detect(&payload, &options, &ctx))
        .await
}

/// POST /api/v1/detect — multipart single-image detection.
pub async fn detect(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<DetectQuery>,
    multipart: Multipart,
) -> Result<Json<DetectionResult>, ApiError> {
    let principal = require_detect_access(&state, &headers, &client_ip(&connect))?;
    let options = options_from_query(query)?;
    let (filename, payload) = read_upload(&state, multipart).await?;
    debug!(filename = %filename, bytes = payload.len(), "detect upload accepted");

    let result = run_detection(
        &state,
        payload,
        options,
        "upload",
        principal.key_id,
        request_id,
    )
    .await?;
    Ok(Json(result))
}

/// POST /api/v1/detect/base64 — JSON body with a base64 payload.
pub async fn detect_base64(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<DetectQuery>,
    Json(body): Json<DetectBase64Request>,
) -> Result<Json<DetectionResult>, ApiError> {
    let principal = require_detect_access(&state, &headers, &client_ip(&connect))?;
    let options = options_from_query(query)?;
    let payload = decode_base64_payload(&body.image_base64, state.settings.max_upload_bytes())?;

    let result = run_detection(
        &state,
        payload,
        options,
        "base64_upload",
        principal.key_id,
        request_id,
    )
    .await?;
    Ok(Json(result))
}

/// POST /api/v1/detect/url — fetch a remote image (SSRF-checked), then detect.
pub async fn detect_url(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<DetectQuery>,
    Json(body): Json<DetectUrlRequest>,
) -> Result<Json<DetectionResult>, ApiError> {
    let principal = require_detect_access(&state, &headers, &client_ip(&connect))?;
    let options = options_from_query(query)?;
    let payload = remote_fetch::fetch_remote_image(
        &body.image_url,
        state.settings.remote_fetch_timeout(),
        state.settings.max_remote_bytes(),
    )
    .await?;

    let result = run_detection(
        &state,
        payload,
        options,
        "remote_url",
        principal.key_id,
        request_id,
    )
    .await?;
    Ok(Json(result))
}

/// POST /api/v1/detect/batch — many files, independent outcomes.
///
/// A failing item never aborts its siblings; partial failure is normal.
pub async fn detect_batch(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<DetectQuery>,
    mut multipart: Multipart,
) -> Result<Json<BatchDetectResponse>, ApiError> {
    let principal = require_detect_access(&state, &headers, &client_ip(&connect))?;
    let options = options_from_query(query)?;

    // The multipart body is a stream, so files are read sequentially;
    // detection afterwards runs concurrently.
    let mut files: Vec<(String, Result<Vec<u8>, DetectError>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        if field.file_name().is_none() {
            continue;
        }
        let filename = imaging::sanitize_filename(field.file_name());
        let content_type = field.content_type().map(str::to_string);
        let payload = match field.bytes().await {
            Ok(data) => validate_upload(
                content_type.as_deref(),
                &data,
                state.settings.max_upload_bytes(),
            )
            .map(|()| data.to_vec()),
            Err(e) => Err(DetectError::InvalidInput(format!(
                "failed to read upload: {e}"
            ))),
        };
        files.push((filename, payload));
    }

    if files.is_empty() {
        return Err(ApiError::InvalidInput("no files in request".to_string()));
    }
    if files.len() > state.settings.max_batch_files {
        return Err(ApiError::InvalidInput(format!(
            "at most {} files per batch",
            state.settings.max_batch_files
        )));
    }

    let total_files = files.len();
    let outcomes = futures::future::join_all(files.into_iter().map(|(filename, payload)| {
        let state = state.clone();
        let options = options.clone();
        let principal_id = principal.key_id.clone();
        let request_id = request_id.clone();
        async move {
            let result = match payload {
                Ok(payload) => {
                    run_detection(
                        &state,
                        payload,
                        options,
                        "batch_upload",
                        principal_id,
                        request_id,
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            (filename, result)
        }
    }))
    .await;

    let mut items = Vec::with_capacity(total_files);
    let mut all_tags: Vec<String> = Vec::new();
    let mut success = 0;
    let mut failed = 0;
    let mut cached_hits = 0;

    for (filename, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                success += 1;
                if result.cached {
                    cached_hits += 1;
                }
                all_tags.extend(result.tags.iter().cloned());
                items.push(BatchItemResult {
                    filename,
                    result: Some(result),
                    error: None,
                });
            }
            Err(e) => {
                failed += 1;
                items.push(BatchItemResult {
                    filename,
                    result: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let top_tags = imaging::tag_frequency(&all_tags)
        .into_iter()
        .map(|(tag, count)| TagCount { tag, count })
        .collect();

    Ok(Json(BatchDetectResponse {
        items,
        summary: BatchSummary {
            total_files,
            success,
            failed,
            cached_hits,
            top_tags,
        },
    }))
}

/// POST /detect — legacy endpoint returning tags only.
pub async fn detect_legacy(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<DetectQuery>,
    multipart: Multipart,
) -> Result<Json<TagsResponse>, ApiError> {
    let principal = require_detect_access(&state, &headers, &client_ip(&connect))?;
    let options = options_from_query(query)?;
    let (_, payload) = read_upload(&state, multipart).await?;

    let result = run_detection(
        &state,
        payload,
        options,
        "legacy_upload",
        principal.key_id,
        request_id,
    )
    .await?;
    Ok(Json(TagsResponse { tags: result.tags }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn query_defaults_match_pipeline_defaults() {
        let options = options_from_query(DetectQuery::default()).unwrap();
        assert_eq!(options, DetectionOptions::default().normalized());
    }

    #[test]
    fn query_rejects_out_of_range_values() {
        for query in [
            DetectQuery {
                conf: Some(0.0),
                ..DetectQuery::default()
            },
            DetectQuery {
                max_tags: Some(0),
                ..DetectQuery::default()
            },
            DetectQuery {
                max_tags: Some(API_MAX_TAGS + 1),
                ..DetectQuery::default()
            },
            DetectQuery {
                min_area: Some(1.5),
                ..DetectQuery::default()
            },
            DetectQuery {
                include_labels: Some("x".repeat(MAX_LABEL_CSV_LEN + 1)),
                ..DetectQuery::default()
            },
        ] {
            assert!(options_from_query(query).is_err());
        }
    }

    #[test]
    fn query_label_csv_is_normalized() {
        let options = options_from_query(DetectQuery {
            include_labels: Some("Dog, cat ,dog".to_string()),
            ..DetectQuery::default()
        })
        .unwrap();
        assert_eq!(options.include_labels, vec!["cat", "dog"]);
    }

    #[test]
    fn upload_validation_distinguishes_failure_kinds() {
        assert!(matches!(
            validate_upload(Some("text/html"), b"x", 100),
            Err(DetectError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            validate_upload(Some("image/png"), b"", 100),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_upload(Some("image/png"), &[0u8; 200], 100),
            Err(DetectError::PayloadTooLarge(_))
        ));
        assert!(validate_upload(Some("image/png"), b"ok", 100).is_ok());
    }

    #[test]
    fn base64_accepts_bare_and_data_url_forms() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"payload");
        assert_eq!(
            decode_base64_payload(&encoded, 1024).unwrap(),
            b"payload".to_vec()
        );
        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(
            decode_base64_payload(&data_url, 1024).unwrap(),
            b"payload".to_vec()
        );
    }

    #[test]
    fn base64_rejects_bad_inputs() {
        assert!(matches!(
            decode_base64_payload("", 1024),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_base64_payload("!!!not base64!!!", 1024),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_base64_payload("data:image/png,missing-marker", 1024),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_base64_payload("data:text/html;base64,PGI+", 1024),
            Err(DetectError::UnsupportedMediaType(_))
        ));
        let encoded = base64::engine::general_purpose::STANDARD.encode([0u8; 64]);
        assert!(matches!(
            decode_base64_payload(&encoded, 16),
            Err(DetectError::PayloadTooLarge(_))
        ));
    }
}
