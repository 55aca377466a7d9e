//! Raw-detection post-processing.
//!
//! Turns what a backend reports into the labeled, ordered, deduplicated
//! tag set the API promises: confidence filtering, person exclusion,
//! include/exclude sets, bbox clamping, minimum-area filtering,
//! per-label deduplication, and truncation to the tag limit.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::detector::{BBox, RawDetection};
use crate::error::DetectError;
use crate::labels;
use crate::options::DetectionOptions;
use crate::types::{BoundingBox, Detection};

/// Output of [`resolve`]: acceptance-ordered tags and their detections.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDetections {
    pub tags: Vec<String>,
    pub detections: Vec<Detection>,
}

/// Resolve raw detections against an image of `width` x `height` pixels.
///
/// Detections are visited in descending confidence order (stable: ties
/// keep their first-seen order), so the first accepted instance of a
/// label is its highest-confidence one. Zero raw detections produce an
/// empty result, not an error.
pub fn resolve(
    width: u32,
    height: u32,
    raw: Vec<RawDetection>,
    options: &DetectionOptions,
) -> Result<ResolvedDetections, DetectError> {
    if width == 0 || height == 0 {
        return Err(DetectError::InvalidInput("image has zero area".to_string()));
    }
    let options = options.normalized();
    let min_area_px = options.min_area_ratio * (width as f32) * (height as f32);

    let mut ordered = raw;
    ordered.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut tags = Vec::new();
    let mut detections = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for item in ordered {
        if item.confidence < options.confidence {
            continue;
        }
        let label_key = item.label.trim().to_lowercase();
        if !options.include_person && label_key == "person" {
            continue;
        }
        if options.exclude_labels.iter().any(|l| *l == label_key) {
            continue;
        }
        if !options.include_labels.is_empty()
            && !options.include_labels.iter().any(|l| *l == label_key)
        {
            continue;
        }

        let display = labels::display_label(&item.label);
        let bbox = clamp_bbox(item.bbox, width, height);
        if bbox_area(bbox) < min_area_px {
            continue;
        }
        if seen.contains(&display) {
            continue;
        }

        detections.push(Detection {
            label: display.clone(),
            confidence: round_to(item.confidence, 4),
            bbox: BoundingBox {
                x1: round_to(bbox.0, 2),
                y1: round_to(bbox.1, 2),
                x2: round_to(bbox.2, 2),
                y2: round_to(bbox.3, 2),
            },
        });
        tags.push(display.clone());
        seen.insert(display);

        if tags.len() >= options.max_tags {
            break;
        }
    }

    Ok(ResolvedDetections { tags, detections })
}

fn clamp_bbox(bbox: BBox, width: u32, height: u32) -> BBox {
    let (x1, y1, x2, y2) = bbox;
    (
        x1.clamp(0.0, width as f32),
        y1.clamp(0.0, height as f32),
        x2.clamp(0.0, width as f32),
        y2.clamp(0.0, height as f32),
    )
}

fn bbox_area(bbox: BBox) -> f32 {
    let (x1, y1, x2, y2) = bbox;
    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
}

fn round_to(value: f32, places: u32) -> f32 {
    let factor = 10f32.powi(places as i32);
    (value * factor).round() / factor
}
