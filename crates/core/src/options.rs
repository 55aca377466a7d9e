//! Detection request options and their canonical normalized form.
//!
//! Options travel with every request and form half of a cache fingerprint,
//! so the canonical encoding in [`DetectionOptions::cache_key_fragment`]
//! must be deterministic: two option sets produce the same fragment iff
//! they are cache-equivalent after normalization.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lowest accepted confidence threshold.
pub const MIN_CONFIDENCE: f32 = 0.01;
/// Upper bound on the number of distinct tags a single request may collect.
pub const MAX_TAGS_LIMIT: usize = 50;

/// Post-processing options applied to raw detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOptions {
    /// Minimum confidence for a detection to be considered.
    pub confidence: f32,
    /// Maximum number of distinct tags to collect.
    pub max_tags: usize,
    /// Minimum bounding-box area as a fraction of the image area.
    pub min_area_ratio: f32,
    /// Whether "person" detections are allowed through.
    pub include_person: bool,
    /// When non-empty, only these labels are accepted.
    pub include_labels: Vec<String>,
    /// Labels rejected unconditionally.
    pub exclude_labels: Vec<String>,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            confidence: 0.7,
            max_tags: 5,
            min_area_ratio: 0.01,
            include_person: false,
            include_labels: Vec::new(),
            exclude_labels: Vec::new(),
        }
    }
}

impl DetectionOptions {
    /// Clamp every field into its valid range and normalize label lists.
    /// Idempotent: `normalized().normalized() == normalized()`.
    pub fn normalized(&self) -> Self {
        Self {
            confidence: self.confidence.clamp(MIN_CONFIDENCE, 1.0),
            max_tags: self.max_tags.clamp(1, MAX_TAGS_LIMIT),
            min_area_ratio: self.min_area_ratio.clamp(0.0, 1.0),
            include_person: self.include_person,
            include_labels: normalize_labels(&self.include_labels),
            exclude_labels: normalize_labels(&self.exclude_labels),
        }
    }

    /// Canonical string encoding used as the options half of a cache key.
    pub fn cache_key_fragment(&self) -> String {
        let n = self.normalized();
        format!(
            "conf={:.4};max_tags={};min_area={:.4};include_person={};include={};exclude={}",
            n.confidence,
            n.max_tags,
            n.min_area_ratio,
            u8::from(n.include_person),
            n.include_labels.join(","),
            n.exclude_labels.join(",")
        )
    }
}

/// Trim, lower-case, drop empties, deduplicate, and sort a label list.
pub fn normalize_labels<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let set: BTreeSet<String> = labels
        .iter()
        .map(|l| l.as_ref().trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    set.into_iter().collect()
}

/// Parse a comma-separated label list into normalized form.
pub fn parse_label_csv(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(raw) => normalize_labels(&raw.split(',').collect::<Vec<_>>()),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_out_of_range_values() {
        let options = DetectionOptions {
            confidence: 3.0,
            max_tags: 500,
            min_area_ratio: -0.5,
            ..DetectionOptions::default()
        };
        let n = options.normalized();
        assert_eq!(n.confidence, 1.0);
        assert_eq!(n.max_tags, MAX_TAGS_LIMIT);
        assert_eq!(n.min_area_ratio, 0.0);
    }

    #[test]
    fn normalized_is_idempotent() {
        let options = DetectionOptions {
            confidence: 0.005,
            include_labels: vec![" Cat ".to_string(), "dog".to_string(), "cat".to_string()],
            ..DetectionOptions::default()
        };
        let once = options.normalized();
        assert_eq!(once.normalized(), once);
    }

    #[test]
    fn label_lists_are_trimmed_lowered_deduped_sorted() {
        let labels = normalize_labels(&["  Dog", "cat", "CAT", "", "  "]);
        assert_eq!(labels, vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn parse_label_csv_handles_none_and_empty_chunks() {
        assert!(parse_label_csv(None).is_empty());
        assert_eq!(
            parse_label_csv(Some("dog, ,Cat,dog")),
            vec!["cat".to_string(), "dog".to_string()]
        );
    }

    #[test]
    fn cache_key_fragment_equal_iff_cache_equivalent() {
        let a = DetectionOptions {
            include_labels: vec!["Dog".to_string(), "cat".to_string()],
            ..DetectionOptions::default()
        };
        let b = DetectionOptions {
            include_labels: vec!["cat".to_string(), "dog".to_string(), "dog".to_string()],
            ..DetectionOptions::default()
        };
        assert_eq!(a.cache_key_fragment(), b.cache_key_fragment());

        let c = DetectionOptions {
            max_tags: 6,
            ..DetectionOptions::default()
        };
        assert_ne!(a.cache_key_fragment(), c.cache_key_fragment());
    }
}
