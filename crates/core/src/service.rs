//! Detection orchestration: cache, decode, detect, resolve, record.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cache::{fingerprint, ResultCache};
use crate::detector::ObjectDetector;
use crate::error::DetectError;
use crate::imaging;
use crate::options::DetectionOptions;
use crate::tagging;
use crate::telemetry::{RecentDetection, TelemetryStore};
use crate::types::DetectionResult;

/// Per-request context threaded into the recent-activity ring.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Where the payload came from: upload, base64_upload, remote_url, ...
    pub source: String,
    pub principal_id: String,
    pub request_id: String,
}

/// The full payload-to-result pipeline for one backend + cache pair.
pub struct DetectionService {
    detector: Arc<dyn ObjectDetector>,
    cache: ResultCache,
    telemetry: Arc<TelemetryStore>,
    max_dimension: u32,
}

impl DetectionService {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        cache: ResultCache,
        telemetry: Arc<TelemetryStore>,
        max_dimension: u32,
    ) -> Self {
        Self {
            detector,
            cache,
            telemetry,
            max_dimension,
        }
    }

    /// Detect objects in `payload`, consulting the result cache first.
    ///
    /// Blocking: decodes the image and calls the detector inline. Callers
    /// on an async runtime go through the inference gate, which moves this
    /// onto the blocking pool.
    pub fn detect(
        &self,
        payload: &[u8],
        options: &DetectionOptions,
        ctx: &RequestContext,
    ) -> Result<DetectionResult, DetectError> {
        if payload.is_empty() {
            return Err(DetectError::InvalidInput("empty image payload".to_string()));
        }
        let options = options.normalized();
        let key = fingerprint(payload, &options);

        if let Some(hit) = self.cache.get(&key) {
            debug!(request_id = %ctx.request_id, source = %ctx.source, "detection cache hit");
            self.telemetry.record_detection(hit.total_detections, true);
            self.record_recent(&hit, ctx);
            return Ok(hit);
        }

        let image = imaging::decode_image(payload)?;
        let (image, _scale) = imaging::resize_to_max_dimension(image, self.max_dimension);

        let started = Instant::now();
        let raw = self
            .detector
            .detect(&image, options.confidence)
            .map_err(|e| match e {
                DetectError::Inference(_) => e,
                other => DetectError::Inference(other.to_string()),
            })?;
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

        let resolved = tagging::resolve(image.width(), image.height(), raw, &options)?;
        let result = DetectionResult {
            total_detections: resolved.detections.len(),
            tags: resolved.tags,
            detections: resolved.detections,
            inference_ms: (inference_ms * 100.0).round() / 100.0,
            cached: false,
        };

        self.cache.put(&key, &result);
        self.telemetry
            .record_detection(result.total_detections, false);
        self.record_recent(&result, ctx);
        Ok(result)
    }

    fn record_recent(&self, result: &DetectionResult, ctx: &RequestContext) {
        self.telemetry.record_analysis(RecentDetection {
            timestamp_ms: RecentDetection::now_ms(),
            source: ctx.source.clone(),
            principal_id: ctx.principal_id.clone(),
            request_id: ctx.request_id.clone(),
            tags: result.tags.clone(),
            total_detections: result.total_detections,
            inference_ms: result.inference_ms,
            cached: result.cached,
        });
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    pub fn model_loaded(&self) -> bool {
        self.detector.is_loaded()
    }
}

/// Constructs a detector backend on first use.
///
/// The seam for swapping in a real model integration without touching the
/// pipeline: implement this and hand it to the provider.
pub trait DetectorBuilder: Send + Sync {
    fn build(&self) -> Result<Arc<dyn ObjectDetector>, DetectError>;
}

/// Sizing knobs for the lazily-built service.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub max_dimension: u32,
    pub cache_max_items: usize,
    pub cache_ttl: Duration,
}

/// Owns and lazily constructs the detector/cache pair exactly once.
///
/// Model loading is expensive, so nothing is built until the first
/// request needs it. Construction happens under a guard; concurrent first
/// callers all receive the same service instance.
pub struct DetectionServiceProvider {
    builder: Arc<dyn DetectorBuilder>,
    config: ProviderConfig,
    telemetry: Arc<TelemetryStore>,
    service: Mutex<Option<Arc<DetectionService>>>,
}

impl DetectionServiceProvider {
    pub fn new(
        builder: Arc<dyn DetectorBuilder>,
        config: ProviderConfig,
        telemetry: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            builder,
            config,
            telemetry,
            service: Mutex::new(None),
        }
    }

    /// Return the service, building the detector and cache on first call.
    pub fn get(&self) -> Result<Arc<DetectionService>, DetectError> {
        let mut guard = self.lock();
        if let Some(service) = guard.as_ref() {
            return Ok(service.clone());
        }
        let detector = self.builder.build()?;
        let service = Arc::new(DetectionService::new(
            detector,
            ResultCache::new(self.config.cache_max_items, self.config.cache_ttl),
            self.telemetry.clone(),
            self.config.max_dimension,
        ));
        *guard = Some(service.clone());
        Ok(service)
    }

    /// Whether the backend has been constructed and reports loaded weights.
    pub fn model_loaded(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|s| s.model_loaded())
            .unwrap_or(false)
    }

    /// Live cache entry count; 0 before the service is first built.
    pub fn cache_size(&self) -> usize {
        self.lock().as_ref().map(|s| s.cache_size()).unwrap_or(0)
    }

    /// Clear the result cache; 0 before the service is first built.
    pub fn clear_cache(&self) -> usize {
        self.lock().as_ref().map(|s| s.clear_cache()).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<DetectionService>>> {
        self.service
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{RawDetection, StubDetector};
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    fn ctx() -> RequestContext {
        RequestContext {
            source: "upload".to_string(),
            principal_id: "anonymous".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    fn service(detections: Vec<RawDetection>) -> (DetectionService, Arc<TelemetryStore>) {
        let telemetry = Arc::new(TelemetryStore::new(50));
        let service = DetectionService::new(
            Arc::new(StubDetector::new(detections)),
            ResultCache::new(16, Duration::from_secs(300)),
            telemetry.clone(),
            1280,
        );
        (service, telemetry)
    }

    fn sample_detections() -> Vec<RawDetection> {
        vec![
            RawDetection::new("cat", 0.93, (1.0, 1.0, 30.0, 30.0)),
            RawDetection::new("dog", 0.88, (5.0, 5.0, 28.0, 28.0)),
        ]
    }

    #[test]
    fn second_identical_request_is_served_from_cache() {
        let (service, telemetry) = service(sample_detections());
        let options = DetectionOptions {
            confidence: 0.5,
            min_area_ratio: 0.0,
            ..DetectionOptions::default()
        };
        let payload = png_bytes(32, 32);

        let first = service.detect(&payload, &options, &ctx()).unwrap();
        let second = service.detect(&payload, &options, &ctx()).unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.tags, second.tags);
        assert_eq!(first.detections, second.detections);
        assert_eq!(first.total_detections, second.total_detections);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.detections_total, 4);
    }

    #[test]
    fn different_options_bypass_the_cache() {
        let (service, _) = service(sample_detections());
        let payload = png_bytes(32, 32);
        let loose = DetectionOptions {
            confidence: 0.5,
            min_area_ratio: 0.0,
            ..DetectionOptions::default()
        };
        let strict = DetectionOptions {
            confidence: 0.9,
            min_area_ratio: 0.0,
            ..DetectionOptions::default()
        };

        let first = service.detect(&payload, &loose, &ctx()).unwrap();
        let second = service.detect(&payload, &strict, &ctx()).unwrap();
        assert!(!second.cached);
        assert_eq!(first.tags, vec!["cat", "dog"]);
        assert_eq!(second.tags, vec!["cat"]);
    }

    #[test]
    fn empty_payload_is_rejected_before_decode() {
        let (service, _) = service(sample_detections());
        let err = service
            .detect(&[], &DetectionOptions::default(), &ctx())
            .unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));
    }

    #[test]
    fn undecodable_payload_is_invalid_input() {
        let (service, _) = service(sample_detections());
        let err = service
            .detect(b"not an image", &DetectionOptions::default(), &ctx())
            .unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));
    }

    #[test]
    fn backend_failures_surface_as_inference_errors() {
        let telemetry = Arc::new(TelemetryStore::new(50));
        let service = DetectionService::new(
            Arc::new(StubDetector::failing()),
            ResultCache::new(16, Duration::from_secs(300)),
            telemetry,
            1280,
        );
        let err = service
            .detect(&png_bytes(32, 32), &DetectionOptions::default(), &ctx())
            .unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));
    }

    #[test]
    fn recent_ring_sees_every_detection() {
        let (service, telemetry) = service(sample_detections());
        let options = DetectionOptions {
            confidence: 0.5,
            min_area_ratio: 0.0,
            ..DetectionOptions::default()
        };
        let payload = png_bytes(32, 32);
        service.detect(&payload, &options, &ctx()).unwrap();
        service.detect(&payload, &options, &ctx()).unwrap();

        let recent = telemetry.recent(10);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].cached);
        assert!(!recent[1].cached);
        assert_eq!(recent[0].source, "upload");
    }

    struct CountingBuilder {
        builds: std::sync::atomic::AtomicUsize,
    }

    impl DetectorBuilder for CountingBuilder {
        fn build(&self) -> Result<Arc<dyn ObjectDetector>, DetectError> {
            self.builds
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Arc::new(StubDetector::new(Vec::new())))
        }
    }

    #[test]
    fn provider_builds_exactly_once() {
        let builder = Arc::new(CountingBuilder {
            builds: std::sync::atomic::AtomicUsize::new(0),
        });
        let provider = DetectionServiceProvider::new(
            builder.clone(),
            ProviderConfig {
                max_dimension: 1280,
                cache_max_items: 16,
                cache_ttl: Duration::from_secs(300),
            },
            Arc::new(TelemetryStore::new(50)),
        );

        assert!(!provider.model_loaded());
        assert_eq!(provider.cache_size(), 0);

        let a = provider.get().unwrap();
        let b = provider.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builder.builds.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(provider.model_loaded());
    }
}
