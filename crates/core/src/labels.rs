//! Detector vocabulary and display-name translation.
//!
//! Backends report labels from the COCO vocabulary; a small override map
//! rewrites the awkward ones into display form. Unknown labels pass
//! through untouched.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;

/// The 80-class COCO vocabulary, in model output order.
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

static DISPLAY_OVERRIDES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("tv", "television"),
        ("cell phone", "mobile phone"),
        ("sports ball", "ball"),
        ("potted plant", "houseplant"),
        ("hair drier", "hair dryer"),
        ("remote", "remote control"),
        ("mouse", "computer mouse"),
        ("couch", "sofa"),
        ("dining table", "table"),
        ("wine glass", "glass"),
        ("hot dog", "hot-dog"),
        ("donut", "doughnut"),
    ])
});

/// Translate a raw detector label into its display form, falling back to
/// the raw label when no override exists.
pub fn display_label(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    match DISPLAY_OVERRIDES.get(key.as_str()) {
        Some(display) => (*display).to_string(),
        None => raw.to_string(),
    }
}

/// Sorted, deduplicated list of every display label the API can emit.
pub fn catalog() -> Vec<String> {
    let set: BTreeSet<String> = COCO_LABELS.iter().map(|l| display_label(l)).collect();
    set.into_iter().collect()
}
