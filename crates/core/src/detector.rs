//! Object-detection capability interface.
//!
//! The pipeline never talks to a concrete model directly; it goes through
//! [`ObjectDetector`], which keeps the heavy model swappable and lets tests
//! run against [`StubDetector`]. Implementations wrapping a non-reentrant
//! native model must serialize calls internally (their own lock) — the
//! inference gate only bounds *admission*, not mutual exclusion.

use std::time::Duration;

use image::RgbImage;

use crate::error::DetectError;

/// Pixel-space bounding box `(x1, y1, x2, y2)`.
pub type BBox = (f32, f32, f32, f32);

/// One detection as produced by a backend, before any post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Capability interface implemented by detection backends.
pub trait ObjectDetector: Send + Sync {
    /// Run detection on a decoded RGB image, returning every detection at or
    /// above `conf_threshold`.
    fn detect(&self, image: &RgbImage, conf_threshold: f32)
        -> Result<Vec<RawDetection>, DetectError>;

    /// Whether the underlying model weights have been loaded.
    fn is_loaded(&self) -> bool;
}

/// Fixture backend standing in for a real model integration.
///
/// Returns a fixed set of detections filtered by the requested confidence
/// threshold. Wire a real model by implementing [`ObjectDetector`] and
/// swapping the builder in the server binary.
#[derive(Debug, Clone, Default)]
pub struct StubDetector {
    detections: Vec<RawDetection>,
    latency: Option<Duration>,
    fail: bool,
}

impl StubDetector {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            latency: None,
            fail: false,
        }
    }

    /// Sleep for `latency` on every call, imitating a slow model.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call with `DetectError::Inference`.
    pub fn failing() -> Self {
        Self {
            detections: Vec::new(),
            latency: None,
            fail: true,
        }
    }
}

impl ObjectDetector for StubDetector {
    fn detect(
        &self,
        _image: &RgbImage,
        conf_threshold: f32,
    ) -> Result<Vec<RawDetection>, DetectError> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        if self.fail {
            return Err(DetectError::Inference("stub backend failure".to_string()));
        }
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= conf_threshold)
            .cloned()
            .collect())
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_image() -> RgbImage {
        RgbImage::new(4, 4)
    }

    #[test]
    fn stub_filters_below_threshold() {
        let stub = StubDetector::new(vec![
            RawDetection::new("cat", 0.9, (0.0, 0.0, 2.0, 2.0)),
            RawDetection::new("dog", 0.3, (0.0, 0.0, 2.0, 2.0)),
        ]);
        let out = stub.detect(&blank_image(), 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "cat");
    }

    #[test]
    fn failing_stub_reports_inference_error() {
        let stub = StubDetector::failing();
        let err = stub.detect(&blank_image(), 0.5).unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));
    }
}
