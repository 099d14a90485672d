use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::AddAssign;
use std::sync::OnceLock;

use crate::error::MalformedBoxError;

// Supported image formats
pub const IMG_FORMATS: &[&str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// An axis-aligned box in corner form.
///
/// Coordinates are in one canonical unit system per image: either pixels or
/// the unit square. Loaders convert other encodings before building a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: u32,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    /// Index of the record this box was read from, if any.
    ///
    /// Writers use it to emit the source text of a kept box verbatim instead
    /// of re-rounding its coordinates.
    pub origin: Option<usize>,
}

impl BoundingBox {
    pub fn new(class_id: u32, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            class_id,
            x_min,
            y_min,
            x_max,
            y_max,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: usize) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Build a box from a center point and a size.
    pub fn from_center(class_id: u32, x_center: f64, y_center: f64, width: f64, height: f64) -> Self {
        Self::new(
            class_id,
            x_center - width / 2.0,
            y_center - height / 2.0,
            x_center + width / 2.0,
            y_center + height / 2.0,
        )
    }

    /// Build a box from a top-left corner and a size (COCO `bbox`).
    pub fn from_xywh(class_id: u32, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(class_id, x, y, x + width, y + height)
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn is_finite(&self) -> bool {
        self.x_min.is_finite()
            && self.y_min.is_finite()
            && self.x_max.is_finite()
            && self.y_max.is_finite()
    }
}

/// The annotation of one image: its dimensions and its ordered boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnnotation {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<BoundingBox>,
    /// Records that failed to parse; dropped and counted by the validity filter.
    pub malformed: Vec<MalformedBoxError>,
}

impl ImageAnnotation {
    pub fn new(image_id: impl Into<String>, width: u32, height: u32, boxes: Vec<BoundingBox>) -> Self {
        Self {
            image_id: image_id.into(),
            width,
            height,
            boxes,
            malformed: Vec::new(),
        }
    }

    /// Image area in the box unit system, as a float.
    pub fn image_area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// The in-memory view of one split.
///
/// `annotations` doubles as the set of present label artifacts; `image_ids`
/// is the set of present image files. Both are keyed by the same id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub annotations: BTreeMap<String, ImageAnnotation>,
    pub image_ids: BTreeSet<String>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_annotation(&mut self, annotation: ImageAnnotation) {
        self.annotations
            .insert(annotation.image_id.clone(), annotation);
    }

    pub fn insert_image(&mut self, image_id: impl Into<String>) {
        self.image_ids.insert(image_id.into());
    }

    pub fn label_ids(&self) -> BTreeSet<String> {
        self.annotations.keys().cloned().collect()
    }

    pub fn total_boxes(&self) -> usize {
        self.annotations.values().map(|a| a.boxes.len()).sum()
    }
}

// Struct to hold removal counts for one run; merged additively across stages and images
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub invalid_removed: usize,
    pub density_capped_removed: usize,
    pub small_removed: usize,
    pub overlap_removed: usize,
    pub orphan_images_removed: usize,
    pub orphan_labels_removed: usize,
    /// Images dropped together with their label because no box survived.
    pub empty_images_removed: usize,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(mut self, other: Counters) -> Self {
        self += other;
        self
    }

    pub fn boxes_removed(&self) -> usize {
        self.invalid_removed + self.density_capped_removed + self.small_removed + self.overlap_removed
    }

    pub fn is_zero(&self) -> bool {
        *self == Counters::default()
    }

    pub fn print_summary(&self) {
        log::info!("=== Sanitization Summary ===");
        log::info!("Invalid boxes removed: {}", self.invalid_removed);
        log::info!("High count boxes removed: {}", self.density_capped_removed);
        log::info!("Small size boxes removed: {}", self.small_removed);
        log::info!("High IoU boxes removed: {}", self.overlap_removed);
        log::info!("Images without labels removed: {}", self.orphan_images_removed);
        log::info!("Labels without images removed: {}", self.orphan_labels_removed);
        if self.empty_images_removed > 0 {
            log::info!("Empty images removed: {}", self.empty_images_removed);
        }

        let orphans = self.orphan_images_removed + self.orphan_labels_removed;
        if orphans > 0 {
            log::warn!(
                "Total orphans removed: {} (images: {}, labels: {})",
                orphans,
                self.orphan_images_removed,
                self.orphan_labels_removed
            );
        }
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, other: Counters) {
        self.invalid_removed += other.invalid_removed;
        self.density_capped_removed += other.density_capped_removed;
        self.small_removed += other.small_removed;
        self.overlap_removed += other.overlap_removed;
        self.orphan_images_removed += other.orphan_images_removed;
        self.orphan_labels_removed += other.orphan_labels_removed;
        self.empty_images_removed += other.empty_images_removed;
    }
}
